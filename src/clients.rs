pub mod classifier;
pub mod gemini;

pub use classifier::{Classifier, ClassifierError, MediaFrame};
pub use gemini::{GeminiClassifier, GeminiConfig};
