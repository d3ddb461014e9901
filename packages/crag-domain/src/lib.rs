pub mod conversation;
pub mod grounding;
pub mod keywords;
pub mod model_output;
pub mod routing;
pub mod similarity;
