pub mod control;
pub mod projector;
pub mod stream;

pub use control::LoopConfig;
pub use projector::ProjectorConfig;
pub use stream::{
    IdColumn, LabelInterpretation, MatchingScheme, StreamLayout, StreamSection, StreamSettings,
};
