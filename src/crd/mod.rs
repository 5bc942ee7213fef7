mod disk_status;
mod postgres_cluster;
mod resize;

pub use disk_status::*;
pub use postgres_cluster::*;
pub use resize::*;
