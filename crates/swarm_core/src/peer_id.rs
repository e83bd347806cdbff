use crate::hash_id::Id20;

/// Generates an Azureus-style peer id: a client prefix followed by random
/// bytes, so other clients can tell who they are talking to.
pub fn generate_peer_id() -> Id20 {
    let mut peer_id = [0u8; 20];

    let u = uuid::Uuid::new_v4();
    peer_id[4..20].copy_from_slice(&u.as_bytes()[..]);

    peer_id[..8].copy_from_slice(b"-SW0001-");

    Id20::new(peer_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_ids_differ() {
        assert_ne!(generate_peer_id(), generate_peer_id());
    }

    #[test]
    fn test_prefix() {
        let id = generate_peer_id();
        assert_eq!(&id.0[..8], b"-SW0001-");
    }
}
