use crate::util::Daemon;

pub async fn run(daemon: &Daemon) -> i32 {
    daemon.get("/health").await
}
