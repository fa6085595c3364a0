// Domain layer: comic records, rename rules and the ports (interfaces) the
// batch steps depend on.

pub mod model;
pub mod naming;
pub mod ports;
