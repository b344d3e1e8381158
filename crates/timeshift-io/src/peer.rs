use std::io;

/// True when an I/O error only means the peer closed or reset its end.
///
/// Such errors end a session cleanly; anything else on a sink is fatal.
pub fn is_peer_gone(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_gone_peers() {
        for kind in [
            io::ErrorKind::BrokenPipe,
            io::ErrorKind::ConnectionReset,
            io::ErrorKind::ConnectionAborted,
            // shutdown() on a socket the peer already reset
            io::ErrorKind::NotConnected,
        ] {
            assert!(is_peer_gone(&io::Error::from(kind)), "{kind:?}");
        }
        for kind in [
            io::ErrorKind::PermissionDenied,
            io::ErrorKind::StorageFull,
            io::ErrorKind::Other,
        ] {
            assert!(!is_peer_gone(&io::Error::from(kind)), "{kind:?}");
        }
    }
}
