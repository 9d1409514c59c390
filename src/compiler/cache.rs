//! Content-addressed build cache.
//!
//! The cache key is a SHA-256 over a fixed label, the unit hash, the hash
//! of the compiler binary itself and a normalized serialization of the
//! build flags (link objects are hashed by content). Layout on disk:
//!
//! ```text
//! <cache_root>/<hex-key>/out      # primary artifact, exec bit preserved
//! <cache_root>/<hex-key>/out.ll   # optional textual IR
//! ```
//!
//! The cache is opt-in via the `CACHE` environment toggle. Read and write
//! failures are swallowed: a broken cache never fails a compilation.

use crate::compiler::resolver::Features;
use crate::settings::{
    CACHE_KEY_LABEL, ENV_CACHE, ENV_CACHE_DIR, ENV_DEBUG, ENV_FAST_MATH, ENV_LINK_ACCELERATE,
    ENV_LINK_OBJ, ENV_NATIVE, env_flag, env_olevel,
};
use sha2::{Digest, Sha256};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

/// The flag set that participates in the cache key. Anything that changes
/// the emitted or linked artifact must be represented here.
#[derive(Debug, Clone, Default)]
pub struct BuildFlags {
    pub olevel: u8,
    pub debug: bool,
    pub native: bool,
    pub fast_math: bool,
    pub link_accelerate: bool,
    pub link_objects: Vec<PathBuf>,
    pub features: Features,
}

impl BuildFlags {
    pub fn from_env(features: Features) -> Self {
        let link_objects = env::var(ENV_LINK_OBJ)
            .ok()
            .filter(|value| !value.is_empty() && value != "0")
            .map(|value| value.split(':').map(PathBuf::from).collect())
            .unwrap_or_default();
        BuildFlags {
            olevel: env_olevel(),
            debug: env_flag(ENV_DEBUG),
            native: env_flag(ENV_NATIVE),
            fast_math: env_flag(ENV_FAST_MATH),
            link_accelerate: env_flag(ENV_LINK_ACCELERATE),
            link_objects,
            features,
        }
    }
}

pub struct Cache {
    root: PathBuf,
}

impl Cache {
    pub fn new(root: PathBuf) -> Self {
        Cache { root }
    }

    /// The cache honoring the environment: `None` unless `CACHE` is on and
    /// a cache root can be determined (`CACHE_DIR` or `$HOME/.cache/aster`).
    pub fn from_env() -> Option<Cache> {
        if !env_flag(ENV_CACHE) {
            return None;
        }
        if let Ok(dir) = env::var(ENV_CACHE_DIR) {
            if !dir.is_empty() {
                return Some(Cache::new(PathBuf::from(dir)));
            }
        }
        let home = env::var_os("HOME")?;
        Some(Cache::new(PathBuf::from(home).join(".cache").join("aster")))
    }

    /// Computes the hex cache key. `None` when an ingredient cannot be
    /// read (missing link object, unreadable compiler binary); the caller
    /// just compiles without the cache.
    pub fn key(unit_hash: &[u8; 32], flags: &BuildFlags) -> Option<String> {
        let mut hasher = Sha256::new();
        hasher.update(CACHE_KEY_LABEL.as_bytes());
        hasher.update(unit_hash);
        hasher.update(compiler_binary_hash()?);

        hasher.update(format!(
            "olevel={}\ndebug={}\nnative={}\nfast_math={}\nlink_accelerate={}\nfeatures={}\n",
            flags.olevel,
            flags.debug as u8,
            flags.native as u8,
            flags.fast_math as u8,
            flags.link_accelerate as u8,
            flags.features.bits(),
        ));
        for object in &flags.link_objects {
            let bytes = fs::read(object).ok()?;
            let mut object_hasher = Sha256::new();
            object_hasher.update(&bytes);
            let digest = object_hasher.finalize();
            hasher.update(format!("obj={}\n", hex(&digest)));
        }

        Some(hex(&hasher.finalize()))
    }

    fn entry(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }

    /// Copies the cached artifacts to the requested paths. A hit requires a
    /// cached file for every requested destination.
    pub fn load(&self, key: &str, out: Option<&Path>, ll: Option<&Path>) -> bool {
        let entry = self.entry(key);
        let pairs = [
            (out, entry.join("out")),
            (ll, entry.join("out.ll")),
        ];
        for (dest, src) in &pairs {
            if dest.is_some() && !src.exists() {
                return false;
            }
        }
        for (dest, src) in &pairs {
            let Some(dest) = dest else { continue };
            // fs::copy carries the permission bits, so the executable bit
            // on `out` survives the round-trip.
            if fs::copy(src, dest).is_err() {
                return false;
            }
        }
        true
    }

    /// Best-effort store; failures are silent (compilation already
    /// succeeded).
    pub fn store(&self, key: &str, out: Option<&Path>, ll: Option<&Path>) {
        let entry = self.entry(key);
        if fs::create_dir_all(&entry).is_err() {
            return;
        }
        if let Some(out) = out {
            let _ = fs::copy(out, entry.join("out"));
        }
        if let Some(ll) = ll {
            let _ = fs::copy(ll, entry.join("out.ll"));
        }
    }
}

fn compiler_binary_hash() -> Option<[u8; 32]> {
    let exe = env::current_exe().ok()?;
    let bytes = fs::read(exe).ok()?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Some(hasher.finalize().into())
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flags() -> BuildFlags {
        BuildFlags {
            olevel: 2,
            ..BuildFlags::default()
        }
    }

    #[test]
    fn key_is_deterministic() {
        let unit_hash = [7u8; 32];
        let a = Cache::key(&unit_hash, &flags()).unwrap();
        let b = Cache::key(&unit_hash, &flags()).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn key_is_sensitive_to_unit_and_flags() {
        let base = Cache::key(&[7u8; 32], &flags()).unwrap();

        assert_ne!(base, Cache::key(&[8u8; 32], &flags()).unwrap());

        let mut o3 = flags();
        o3.olevel = 3;
        assert_ne!(base, Cache::key(&[7u8; 32], &o3).unwrap());

        let mut fast = flags();
        fast.fast_math = true;
        assert_ne!(base, Cache::key(&[7u8; 32], &fast).unwrap());

        let mut with_features = flags();
        with_features.features.insert(Features::TLS);
        assert_ne!(base, Cache::key(&[7u8; 32], &with_features).unwrap());
    }

    #[test]
    fn key_is_sensitive_to_link_object_contents() {
        let dir = tempfile::tempdir().unwrap();
        let object = dir.path().join("runtime.o");
        fs::write(&object, b"object code v1").unwrap();

        let mut with_object = flags();
        with_object.link_objects = vec![object.clone()];
        let first = Cache::key(&[7u8; 32], &with_object).unwrap();

        fs::write(&object, b"object code v2").unwrap();
        let second = Cache::key(&[7u8; 32], &with_object).unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn missing_link_object_disables_the_key() {
        let mut broken = flags();
        broken.link_objects = vec![PathBuf::from("/definitely/not/here.o")];
        assert!(Cache::key(&[7u8; 32], &broken).is_none());
    }

    #[test]
    fn store_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Cache::new(dir.path().join("cache"));

        let artifact = dir.path().join("prog");
        let ir = dir.path().join("prog.ll");
        fs::write(&artifact, b"#!binary").unwrap();
        fs::write(&ir, b"; ModuleID = 'aster'\n").unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&artifact, fs::Permissions::from_mode(0o755)).unwrap();
        }

        cache.store("abc123", Some(&artifact), Some(&ir));

        let out_dest = dir.path().join("copied");
        let ll_dest = dir.path().join("copied.ll");
        assert!(cache.load("abc123", Some(&out_dest), Some(&ll_dest)));
        assert_eq!(fs::read(&out_dest).unwrap(), b"#!binary");
        assert_eq!(fs::read(&ll_dest).unwrap(), b"; ModuleID = 'aster'\n");

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(&out_dest).unwrap().permissions().mode();
            assert_ne!(mode & 0o111, 0, "exec bit must survive the cache");
        }
    }

    #[test]
    fn load_misses_when_entry_is_absent() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Cache::new(dir.path().join("cache"));
        assert!(!cache.load("missing", None, Some(&dir.path().join("x.ll"))));
    }

    #[test]
    fn partial_entries_do_not_hit_for_both_files() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Cache::new(dir.path().join("cache"));
        let ir = dir.path().join("a.ll");
        fs::write(&ir, b"ir").unwrap();
        cache.store("k", None, Some(&ir));

        // The IR alone hits; asking for the binary as well misses.
        assert!(cache.load("k", None, Some(&dir.path().join("b.ll"))));
        assert!(!cache.load(
            "k",
            Some(&dir.path().join("bin")),
            Some(&dir.path().join("c.ll"))
        ));
    }
}
