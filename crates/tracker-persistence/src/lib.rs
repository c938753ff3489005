pub mod serialization;
pub mod store;
pub mod timer_store;
pub mod traits;

pub use serialization::*;
pub use store::*;
pub use timer_store::TimerStore;
pub use traits::*;
