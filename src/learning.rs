//! 自己学習型カテゴリ合意エンジン。
//!
//! シグネチャ生成、検証済みパターンの保存と類似検索、多数決による合意形成、
//! そして参照モード／一括モードを切り替えるオーケストレータから成る。
pub mod consensus;
pub mod model;
pub mod orchestrator;
pub mod prompt;
pub mod response;
pub mod signature;
pub mod store;

pub use consensus::{ConsensusBuilder, ConsensusError, ConsensusRequest, ConsensusSettings};
pub use model::{AnalysisResult, PatternMatch, VerifiedPattern};
pub use orchestrator::{
    ClassificationOrchestrator, ClassificationResult, ClassificationSource, ClassifyError,
    OrchestratorSettings, ReferenceInfo,
};
pub use prompt::PromptBuilder;
pub use response::{ParseFailure, ParsedResponse, ResponseError};
pub use signature::{ContentMetadata, ContentSignature, SignatureGenerator};
pub use store::{StoreError, StoreStats, VerifiedPatternStore};
