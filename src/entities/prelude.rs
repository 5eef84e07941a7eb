pub use super::badges::Entity as Badges;
pub use super::challenges::Entity as Challenges;
pub use super::ctf_events::Entity as CtfEvents;
pub use super::magic_links::Entity as MagicLinks;
pub use super::sessions::Entity as Sessions;
pub use super::user_badges::Entity as UserBadges;
pub use super::user_challenges::Entity as UserChallenges;
