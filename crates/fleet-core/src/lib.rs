pub mod clock;
pub mod error;
pub mod ids;
pub mod mime;
pub mod model;
pub mod types;

pub use clock::*;
pub use error::*;
pub use ids::*;
pub use mime::*;
pub use model::*;
pub use types::*;
