pub mod badge_service;
pub mod challenge_service;
pub mod magic_link_service;

pub use badge_service::BadgeService;
pub use challenge_service::{ChallengeProgressView, ChallengeService, ServiceError};
pub use magic_link_service::{IssuedLink, MagicLinkError, MagicLinkService};
