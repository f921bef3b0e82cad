//! Chat core: the transcript and the generation state machine.

pub mod conversation;
pub mod coordinator;

pub use conversation::{Author, ChatTurn, ConversationStore, TurnId};
pub use coordinator::{
    CoordinatorConfig, CoordinatorHandle, GeneratingFlagPolicy, GenerationCoordinator,
    GenerationError, GenerationPhase, SendOutcome, DEFAULT_SYSTEM_PROMPT, DEFAULT_TOKENS_LIMIT,
};
