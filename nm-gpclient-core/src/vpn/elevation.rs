//! Real user detection
//!
//! The service runs as root under NetworkManager, but gpclient opens a browser
//! for SAML and must do so as the desktop user.

use nix::unistd::{Uid, User};
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;

/// The user gpclient should act on behalf of
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RealUser {
    pub uid: u32,
    pub name: String,
    pub home: PathBuf,
}

impl RealUser {
    pub fn is_root(&self) -> bool {
        self.uid == 0
    }
}

const LOGINCTL_TIMEOUT: Duration = Duration::from_secs(2);

/// Resolve the real user
///
/// Order: `SUDO_UID`/`SUDO_USER`, the first non-root user with a session in
/// `loginctl`, then the owner of this process.
pub async fn resolve_real_user() -> RealUser {
    if let Some(user) = from_sudo_env() {
        debug!("Real user from sudo environment: {} ({})", user.name, user.uid);
        return user;
    }

    if let Some(user) = from_loginctl().await {
        debug!("Real user from loginctl: {} ({})", user.name, user.uid);
        return user;
    }

    let user = current_user();
    debug!("Real user is the service owner: {} ({})", user.name, user.uid);
    user
}

fn from_sudo_env() -> Option<RealUser> {
    let uid = std::env::var("SUDO_UID").ok()?.trim().parse::<u32>().ok()?;
    let name = std::env::var("SUDO_USER").ok().filter(|n| !n.is_empty())?;
    let home = home_of(uid).unwrap_or_else(|| PathBuf::from(format!("/home/{}", name)));
    Some(RealUser { uid, name, home })
}

async fn from_loginctl() -> Option<RealUser> {
    let output = tokio::time::timeout(
        LOGINCTL_TIMEOUT,
        tokio::process::Command::new("loginctl")
            .args(["list-users", "--no-legend"])
            .kill_on_drop(true)
            .output(),
    )
    .await;

    let output = match output {
        Ok(Ok(output)) if output.status.success() => output,
        Ok(Ok(_)) => return None,
        Ok(Err(e)) => {
            debug!("loginctl failed: {}", e);
            return None;
        }
        Err(_) => {
            debug!("loginctl timed out");
            return None;
        }
    };

    parse_loginctl_users(&String::from_utf8_lossy(&output.stdout))
        .into_iter()
        .find_map(|(uid, name)| {
            let home = home_of(uid)?;
            Some(RealUser { uid, name, home })
        })
}

/// Non-root `(uid, name)` pairs from `loginctl list-users --no-legend`
pub fn parse_loginctl_users(output: &str) -> Vec<(u32, String)> {
    output
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let uid = fields.next()?.parse::<u32>().ok()?;
            let name = fields.next()?;
            (name != "root").then(|| (uid, name.to_string()))
        })
        .collect()
}

fn current_user() -> RealUser {
    let uid = nix::unistd::getuid().as_raw();
    let name = std::env::var("USER").unwrap_or_else(|_| "root".to_string());
    let home = std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(format!("/home/{}", name)));
    RealUser { uid, name, home }
}

fn home_of(uid: u32) -> Option<PathBuf> {
    match User::from_uid(Uid::from_raw(uid)) {
        Ok(Some(user)) => Some(user.dir),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_loginctl_users() {
        let output = "     0 root      no   \n  1000 alice     yes  active\n  1001 bob       no\n";
        assert_eq!(
            parse_loginctl_users(output),
            vec![(1000, "alice".to_string()), (1001, "bob".to_string())]
        );
    }

    #[test]
    fn test_parse_loginctl_ignores_garbage() {
        assert!(parse_loginctl_users("").is_empty());
        assert!(parse_loginctl_users("No users.\n").is_empty());
        assert!(parse_loginctl_users("1000\n").is_empty());
    }

    #[test]
    fn test_root_user() {
        let root = RealUser {
            uid: 0,
            name: "root".to_string(),
            home: PathBuf::from("/root"),
        };
        assert!(root.is_root());
    }
}
