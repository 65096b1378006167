pub mod feed;
pub mod notification;
pub mod post;
pub mod user;

pub use feed::{FeedEntry, FeedSource, FEED_CAPACITY};
pub use notification::{
    ActorSnapshot, Notification, NotificationKind, NOTIFICATION_LIST_CAP, NOTIFICATION_TTL_SECS,
};
pub use post::{PostCounters, PostRecord, PostSnapshot, PostView};
pub use user::{
    PasswordVerifier, Profile, PublicProfile, UserCounters, UserRecord, UserSettings,
    LIKED_POSTS_CAP,
};
