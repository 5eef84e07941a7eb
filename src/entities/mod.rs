pub mod prelude;

pub mod badges;
pub mod challenges;
pub mod ctf_events;
pub mod magic_links;
pub mod sessions;
pub mod user_badges;
pub mod user_challenges;
