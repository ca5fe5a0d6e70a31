use chrono::{DateTime, Utc};

/// Clock seam so handlers and tests agree on "now".
pub trait TimeSource {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Clone)]
pub struct SystemTime {}

impl TimeSource for SystemTime {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
