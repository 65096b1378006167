pub mod fanout;
pub mod media;
pub mod mentions;
pub mod notifications;
pub mod posts;
pub mod ranking;
pub mod search;
pub mod timeline;
pub mod users;

pub use fanout::{FanoutEvent, FanoutWorker};
pub use media::MediaService;
pub use notifications::NotificationService;
pub use posts::PostService;
pub use ranking::RankingService;
pub use search::SearchIndex;
pub use timeline::TimelineService;
pub use users::UserService;
