//! 消息服务层：客户端抽象与实现（Stream Chat REST / Mock）、AI 指示器事件、入站事件总线

pub mod events;
pub mod mock;
pub mod stream;
pub mod token;
pub mod traits;

pub use events::{AiState, ChatEvent, EventBus, IndicatorEvent, Subscription, EVENT_AI_STOP, EVENT_MESSAGE_NEW};
pub use mock::{ChatCall, MockChatClient};
pub use stream::StreamChatClient;
pub use traits::{ChannelRef, ChatClient, ChatError, ChatMessage, ChatUser, MessageUpdate, NewMessage};
