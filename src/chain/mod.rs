// Chain data - beacon, execution and price collaborators

pub mod beacon;
pub mod domain;
pub mod execution;
pub mod price;
