use crate::util::Daemon;

/// Learning profile for `user`, or for the caller when omitted.
pub async fn show(daemon: &Daemon, user: Option<&str>) -> i32 {
    let user = user.unwrap_or(&daemon.user);
    daemon.get(&format!("/v1/profiles/{user}")).await
}

pub async fn tracks(daemon: &Daemon) -> i32 {
    daemon.get("/v1/tracks").await
}
