pub mod shell;

/// Host name recorded in lock objects.
pub fn hostname() -> String {
    #[cfg(unix)]
    let name = nix::unistd::gethostname()
        .ok()
        .and_then(|h| h.into_string().ok());
    #[cfg(not(unix))]
    let name = std::env::var("COMPUTERNAME").ok();

    name.filter(|n| !n.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}
