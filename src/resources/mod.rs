pub mod certmanager;
pub mod containerjfrs;
pub mod cryostats;
pub mod flightrecorders;
pub mod openshift;
pub mod recordings;
