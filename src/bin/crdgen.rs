use kube::CustomResourceExt;

use cryostat_operator::resources::containerjfrs::ContainerJFR;
use cryostat_operator::resources::cryostats::Cryostat;
use cryostat_operator::resources::flightrecorders::FlightRecorder;
use cryostat_operator::resources::recordings::Recording;

fn main() {
    let crds = [
        Cryostat::crd(),
        ContainerJFR::crd(),
        FlightRecorder::crd(),
        Recording::crd(),
    ];
    for crd in crds {
        print!("---\n{}", serde_yaml::to_string(&crd).unwrap());
    }
}
