pub mod forest;
pub mod lasso;
pub mod null;
pub mod traits;
pub mod tree;

pub use forest::RandomForestFamily;
pub use lasso::LassoFamily;
pub use null::NullFamily;
pub use traits::{FittedModel, ModelFamily};
pub use tree::TreeFamily;
