pub mod cached;
pub mod client;
pub mod types;

pub use cached::CachedStoryClient;
pub use client::{StoryApiClient, StoryBackend};
