/// Integration tests for installation media download and verification
#[cfg(test)]
mod tests {
    use axum::{routing::get, Router};
    use sha2::{Digest, Sha512};
    use std::fs;
    use std::net::TcpListener;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tempfile::tempdir;
    use vauban::config::VaubanConfig;
    use vauban::error::VaubanError;
    use vauban::media::MediaStore;
    use vauban::tree::ImageTree;

    const ISO: &[u8] = b"debian installation medium";

    struct Mirror {
        base: String,
        iso_hits: Arc<AtomicUsize>,
        index_hits: Arc<AtomicUsize>,
    }

    fn digest(bytes: &[u8]) -> String {
        hex::encode(Sha512::digest(bytes))
    }

    /// Serves `ISO` as `/debian.iso` next to the given `SHA512SUMS` index.
    fn mirror(index: String) -> Mirror {
        let iso_hits = Arc::new(AtomicUsize::new(0));
        let index_hits = Arc::new(AtomicUsize::new(0));

        let iso_counter = iso_hits.clone();
        let index_counter = index_hits.clone();
        let app = Router::new()
            .route(
                "/debian.iso",
                get(move || {
                    iso_counter.fetch_add(1, Ordering::SeqCst);
                    async { ISO.to_vec() }
                }),
            )
            .route(
                "/SHA512SUMS",
                get(move || {
                    index_counter.fetch_add(1, Ordering::SeqCst);
                    let body = index.clone();
                    async move { body }
                }),
            );

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.set_nonblocking(true).unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        std::thread::spawn(move || {
            let runtime = tokio::runtime::Runtime::new().unwrap();
            runtime.block_on(async move {
                axum::Server::from_tcp(listener)
                    .unwrap()
                    .serve(app.into_make_service())
                    .await
                    .unwrap();
            });
        });

        Mirror {
            base,
            iso_hits,
            index_hits,
        }
    }

    fn release_tree(base: &str) -> ImageTree {
        let yaml = format!(
            "debian:\n  url: {base}/debian.iso\n  sha512sums: {base}/SHA512SUMS\n  stages: [base]\n"
        );
        ImageTree::from_config(&VaubanConfig::from_yaml_str(&yaml).unwrap()).unwrap()
    }

    #[test]
    fn test_download_and_verify() {
        let mirror = mirror(format!("{}  debian.iso\n", digest(ISO)));
        let tree = release_tree(&mirror.base);
        let node = tree.resolve("debian").unwrap();
        let dir = tempdir().unwrap();
        let store = MediaStore::new(dir.path());

        let path = store.resolve(node, true).unwrap();
        assert_eq!(path, dir.path().join("debian.iso"));
        assert_eq!(fs::read(&path).unwrap(), ISO);
        assert_eq!(mirror.iso_hits.load(Ordering::SeqCst), 1);

        // verified once per store
        store.resolve(node, true).unwrap();
        assert_eq!(mirror.iso_hits.load(Ordering::SeqCst), 1);
        assert_eq!(mirror.index_hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_valid_cache_is_reused() {
        let mirror = mirror(format!("{}  debian.iso\n", digest(ISO)));
        let tree = release_tree(&mirror.base);
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("debian.iso"), ISO).unwrap();

        let store = MediaStore::new(dir.path());
        store.resolve(tree.resolve("debian").unwrap(), true).unwrap();

        assert_eq!(mirror.index_hits.load(Ordering::SeqCst), 1);
        assert_eq!(mirror.iso_hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_corrupted_cache_is_replaced() {
        let mirror = mirror(format!("{}  debian.iso\n", digest(ISO)));
        let tree = release_tree(&mirror.base);
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("debian.iso"), b"truncated").unwrap();

        let store = MediaStore::new(dir.path());
        let path = store.resolve(tree.resolve("debian").unwrap(), true).unwrap();

        assert_eq!(fs::read(path).unwrap(), ISO);
        assert_eq!(mirror.iso_hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_mismatched_download_fails() {
        let mirror = mirror(format!("{}  debian.iso\n", digest(b"another medium")));
        let tree = release_tree(&mirror.base);
        let dir = tempdir().unwrap();

        let store = MediaStore::new(dir.path());
        let err = store
            .resolve(tree.resolve("debian").unwrap(), true)
            .unwrap_err();

        assert!(matches!(err, VaubanError::MediaIntegrity { .. }));
        assert_eq!(mirror.iso_hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unlisted_medium_fails() {
        let mirror = mirror(format!("{}  other.iso\n", digest(ISO)));
        let tree = release_tree(&mirror.base);
        let dir = tempdir().unwrap();

        let store = MediaStore::new(dir.path());
        let err = store
            .resolve(tree.resolve("debian").unwrap(), true)
            .unwrap_err();

        assert!(matches!(err, VaubanError::Download { .. }));
        assert!(err.to_string().contains("no checksum listed for debian.iso"));
        assert_eq!(mirror.iso_hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_check_mode_never_fetches() {
        let mirror = mirror(format!("{}  debian.iso\n", digest(ISO)));
        let tree = release_tree(&mirror.base);
        let dir = tempdir().unwrap();

        let store = MediaStore::new(dir.path());
        let path = store.resolve(tree.resolve("debian").unwrap(), false).unwrap();

        assert_eq!(path, dir.path().join("debian.iso"));
        assert_eq!(mirror.index_hits.load(Ordering::SeqCst), 0);
    }
}
