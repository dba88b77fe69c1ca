// kltrack: grid-distributed corner selection and pyramidal KLT tracking
// for monocular visual front-ends.
//
// Reference: Lucas & Kanade, "An Iterative Image Registration Technique"
// (IJCAI 1981); Shi & Tomasi, "Good Features to Track" (CVPR 1994);
// Rosten & Drummond, "Machine learning for high-speed corner detection"
// (ECCV 2006).

pub mod error;
pub mod image;
pub mod pyramid;
pub mod fast;
pub mod shi_tomasi;
pub mod grid;
pub mod selector;
pub mod calculator;
pub mod flow;
pub mod camera;
pub mod pool;
pub mod frontend;

pub use calculator::{CalculatorConfig, OpticalFlowCalculator, TrackingMethod, TrackingResult};
pub use error::{KltError, Result};
pub use flow::{FlowConfig, OpticalFlow};
pub use image::{Image, ImageView};
pub use pyramid::ImagePyramid;
pub use selector::{FeatureCorner, GridFeatureSelector, SelectorConfig};
