pub mod traits;
pub mod initialization;
pub mod conv;
pub mod dense;

pub use traits::{Layer as LayerTrait, Param, ParamMut};
pub use initialization::{WeightInit, init_rng};
pub use conv::Conv2DLayer;
pub use dense::DenseLayer;
