pub mod identifier;
pub mod outcome;
pub mod record;
pub mod work_range;

pub use identifier::Identifier;
pub use outcome::Outcome;
pub use record::{RecordStatus, ResultRecord};
pub use work_range::{partition, PartitionError, WorkRange};
