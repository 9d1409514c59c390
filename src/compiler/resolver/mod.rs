//! Multi-module resolver and unit assembly.
//!
//! Walks `use` imports depth-first from the entry file, loads each module
//! exactly once (keyed by canonical path), and concatenates the sources in
//! postorder into a single NUL-terminated byte buffer — the assembled unit —
//! with each module's `use` preamble replaced by marker comments:
//!
//! ```text
//! # --- module: src/core/io.as ---
//! # --- use: core.buffers ---
//! ```
//!
//! A SHA-256 hash runs over every byte appended (the trailing NUL is not
//! hashed), so identical module sets always produce identical unit hashes
//! regardless of how the filesystem was traversed.

pub mod lockfile;

use crate::compiler::compiler_errors::{CompileError, ErrorLocation};
use crate::settings::{
    DEP_DIR_NAME, LIB_ENTRY_STEM, LOCKFILE_NAME, SRC_DIR_NAME,
};
use crate::{return_file_error, return_syntax_error, unit_log};
use self::lockfile::{Lockfile, parse_lockfile};
use rustc_hash::FxHashMap;
use sha2::{Digest, Sha256};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

/// Runtime helpers that must be linked with the emitted artifact, detected
/// from the paths of the modules included in the unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Features(u32);

impl Features {
    pub const TLS: Features = Features(1);
    pub const METAL: Features = Features(2);

    pub fn insert(&mut self, other: Features) {
        self.0 |= other.0;
    }

    pub fn contains(&self, other: Features) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn bits(&self) -> u32 {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModuleId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleKind {
    /// The entry module.
    Root,
    /// A module loaded from disk via `use`.
    File,
    /// A synthetic prefix module (`core` for `core.io`), created so
    /// qualified lookups can traverse dotted names. Owns no unit bytes.
    Namespace,
}

#[derive(Debug)]
pub struct ModuleInfo {
    /// Dotted logical name (`core.io`).
    pub name: String,
    /// Path relative to the workspace root; `None` for namespace modules.
    pub rel_path: Option<PathBuf>,
    /// Byte offset of this module's marker inside the unit.
    pub start: u32,
    pub kind: ModuleKind,
    /// Resolved imports, in source order. Always file modules.
    pub imports: Vec<ModuleId>,
}

impl ModuleInfo {
    pub fn is_file(&self) -> bool {
        !matches!(self.kind, ModuleKind::Namespace)
    }
}

/// The assembled compilation unit. Owns the unit bytes for the whole
/// parse + emit phase; the compiler only ever borrows them.
#[derive(Debug)]
pub struct SourceUnit {
    /// Module sources in postorder, marker-annotated, NUL-terminated.
    bytes: Vec<u8>,
    /// SHA-256 over the bytes (without the trailing NUL).
    pub hash: [u8; 32],
    /// File modules first (ids in unit order), then namespace modules.
    modules: Vec<ModuleInfo>,
    file_module_count: usize,
    by_name: FxHashMap<String, ModuleId>,
    pub entry: ModuleId,
    pub features: Features,
    pub root: PathBuf,
}

impl SourceUnit {
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn module(&self, id: ModuleId) -> &ModuleInfo {
        &self.modules[id.0 as usize]
    }

    pub fn modules(&self) -> &[ModuleInfo] {
        &self.modules
    }

    pub fn file_module_count(&self) -> usize {
        self.file_module_count
    }

    pub fn file_modules(&self) -> impl Iterator<Item = &ModuleInfo> {
        self.modules[..self.file_module_count].iter()
    }

    pub fn module_named(&self, name: &str) -> Option<ModuleId> {
        self.by_name.get(name).copied()
    }

    pub fn hash_hex(&self) -> String {
        self.hash.iter().map(|b| format!("{b:02x}")).collect()
    }
}

/// One module during traversal, before final ids are known.
struct LoadedModule {
    rel_path: PathBuf,
    name: String,
    source: Vec<u8>,
    /// (dotted name, loaded index) per `use`, in source order.
    imports: Vec<(String, usize)>,
    /// Byte ranges of the stripped `use` lines (newline included).
    use_lines: Vec<(usize, usize)>,
}

struct Resolver {
    root: PathBuf,
    lockfile: Lockfile,
    visited: FxHashMap<PathBuf, usize>,
    loaded: Vec<LoadedModule>,
    /// Postorder of indices into `loaded`.
    order: Vec<usize>,
}

/// Resolves the module graph rooted at `entry_path` and assembles the unit.
pub fn resolve_unit(entry_path: &Path) -> Result<SourceUnit, CompileError> {
    let entry_abs = match fs::canonicalize(entry_path) {
        Ok(path) => path,
        Err(e) => return_file_error!(entry_path, format!("Could not open entry file: {e}")),
    };
    let entry_dir = entry_abs.parent().unwrap_or(Path::new("/")).to_path_buf();
    let root = find_workspace_root(&entry_dir);
    let lockfile = parse_lockfile(&root)?;

    let mut resolver = Resolver {
        root,
        lockfile,
        visited: FxHashMap::default(),
        loaded: Vec::new(),
        order: Vec::new(),
    };

    let entry_index = resolver.load_module(&entry_abs, None)?;
    resolver.assemble(entry_index)
}

/// Walks upward from `start` until a directory containing the lockfile is
/// found, falling back to the current working directory.
fn find_workspace_root(start: &Path) -> PathBuf {
    let mut dir = start.to_path_buf();
    loop {
        if dir.join(LOCKFILE_NAME).exists() {
            return dir;
        }
        match dir.parent() {
            Some(parent) => dir = parent.to_path_buf(),
            None => break,
        }
    }
    env::current_dir().unwrap_or_else(|_| start.to_path_buf())
}

/// Derives the dotted logical name from a root-relative path:
/// `src/core/io.as` → `core.io`, `libraries/d/src/p.as` → `d.p`,
/// `libraries/d/src/lib.as` → `d`.
fn module_name_from_rel(rel: &Path) -> String {
    let mut segments: Vec<String> = Vec::new();
    for component in rel.components() {
        if let std::path::Component::Normal(os) = component {
            segments.push(os.to_string_lossy().to_string());
        }
    }
    if let Some(last) = segments.last_mut() {
        if let Some(stem) = Path::new(last.as_str()).file_stem() {
            *last = stem.to_string_lossy().to_string();
        }
    }

    if segments.first().map(String::as_str) == Some(SRC_DIR_NAME) {
        segments.remove(0);
    } else if segments.len() >= 3
        && segments[0] == DEP_DIR_NAME
        && segments[2] == SRC_DIR_NAME
    {
        let dep = segments[1].clone();
        let rest: Vec<String> = segments.split_off(3);
        segments = vec![dep];
        let is_lib_entry = rest.len() == 1 && rest[0] == LIB_ENTRY_STEM;
        if !is_lib_entry {
            segments.extend(rest);
        }
    }

    segments.join(".")
}

/// A scanned `use` preamble: dotted import names with the byte ranges of
/// their source lines.
struct Preamble {
    imports: Vec<(String, (usize, usize))>,
}

/// Scans the prefix of a file containing only blank lines, `#` comments and
/// `use <dotted>` lines. The first other line terminates the scan.
fn scan_preamble(source: &[u8], path: &Path) -> Result<Preamble, CompileError> {
    let mut imports = Vec::new();
    let mut offset = 0usize;
    let mut line_number = 0usize;

    while offset < source.len() {
        line_number += 1;
        let line_end = source[offset..]
            .iter()
            .position(|&b| b == b'\n')
            .map(|p| offset + p + 1)
            .unwrap_or(source.len());
        let line = &source[offset..line_end];
        let text = std::str::from_utf8(line).unwrap_or("").trim_end_matches('\n');
        let trimmed = text.trim();

        if trimmed.is_empty() || trimmed.starts_with('#') {
            offset = line_end;
            continue;
        }

        let Some(rest) = trimmed.strip_prefix("use") else {
            break;
        };
        if !rest.starts_with(char::is_whitespace) {
            break;
        }
        let dotted = rest.trim();
        if !is_valid_dotted_name(dotted) {
            return_syntax_error!(
                format!("Malformed import `use {dotted}`"),
                ErrorLocation::new(
                    path.to_path_buf(),
                    line_number,
                    1,
                    trimmed.chars().take(40).collect(),
                ),
                {
                    CompilationStage => "Module Resolution",
                    PrimarySuggestion => "Imports look like `use core.io` with dot-separated identifiers",
                }
            );
        }
        imports.push((dotted.to_string(), (offset, line_end)));
        offset = line_end;
    }

    Ok(Preamble { imports })
}

fn is_valid_dotted_name(name: &str) -> bool {
    !name.is_empty()
        && name.split('.').all(|segment| {
            let mut chars = segment.chars();
            matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        })
}

impl Resolver {
    /// Loads one module (and, depth-first, everything it imports). Returns
    /// the module's index into `loaded`. Revisits return the existing index.
    fn load_module(
        &mut self,
        abs_path: &Path,
        dotted: Option<&str>,
    ) -> Result<usize, CompileError> {
        let canonical = match fs::canonicalize(abs_path) {
            Ok(path) => path,
            Err(e) => {
                return_file_error!(
                    abs_path,
                    format!("Could not resolve module file: {e}")
                )
            }
        };
        if let Some(&existing) = self.visited.get(&canonical) {
            return Ok(existing);
        }

        let source = match fs::read(&canonical) {
            Ok(bytes) => bytes,
            Err(e) => return_file_error!(&canonical, format!("Could not read module: {e}")),
        };

        let rel_path = canonical
            .strip_prefix(&self.root)
            .map(Path::to_path_buf)
            .unwrap_or_else(|_| canonical.clone());
        let name = match dotted {
            Some(dotted) => dotted.to_string(),
            None => module_name_from_rel(&rel_path),
        };

        let preamble = scan_preamble(&source, &rel_path)?;

        // Reserve the slot before recursing so import cycles cannot revisit.
        let index = self.loaded.len();
        self.visited.insert(canonical, index);
        self.loaded.push(LoadedModule {
            rel_path,
            name,
            source,
            imports: Vec::new(),
            use_lines: preamble.imports.iter().map(|(_, range)| *range).collect(),
        });

        let mut imports = Vec::with_capacity(preamble.imports.len());
        for (dotted, _) in &preamble.imports {
            let import_path = self.resolve_import(dotted, index)?;
            let child = self.load_module(&import_path, Some(dotted))?;
            imports.push((dotted.clone(), child));
        }
        self.loaded[index].imports = imports;

        self.order.push(index);
        Ok(index)
    }

    /// Maps `use <dotted>` to a file path: `<root>/src/<dots→slashes>.as`,
    /// or through a lockfile dep when the first segment names one.
    fn resolve_import(&self, dotted: &str, from: usize) -> Result<PathBuf, CompileError> {
        let mut segments = dotted.split('.');
        let first = segments.next().unwrap_or("");
        let remainder: Vec<&str> = segments.collect();

        let path = if let Some(dep_root) = self.lockfile.dep_root(first) {
            let mut path = dep_root.join(SRC_DIR_NAME);
            if remainder.is_empty() {
                path.push(format!("{LIB_ENTRY_STEM}.{}", crate::settings::ASTER_FILE_EXTENSION));
            } else {
                for (i, segment) in remainder.iter().enumerate() {
                    if i + 1 == remainder.len() {
                        path.push(format!("{segment}.{}", crate::settings::ASTER_FILE_EXTENSION));
                    } else {
                        path.push(segment);
                    }
                }
            }
            path
        } else {
            let mut path = self.root.join(SRC_DIR_NAME);
            let all: Vec<&str> = dotted.split('.').collect();
            for (i, segment) in all.iter().enumerate() {
                if i + 1 == all.len() {
                    path.push(format!("{segment}.{}", crate::settings::ASTER_FILE_EXTENSION));
                } else {
                    path.push(segment);
                }
            }
            path
        };

        if !path.exists() {
            let from_path = self.loaded[from].rel_path.clone();
            return_file_error!(
                &from_path,
                format!(
                    "Could not resolve `use {dotted}`: no module at {}",
                    path.display()
                )
            );
        }
        Ok(path)
    }

    /// Appends every module in postorder (markers + stripped source), hashes
    /// as it goes, NUL-terminates, then materializes namespace modules.
    fn assemble(self, entry_index: usize) -> Result<SourceUnit, CompileError> {
        let Resolver {
            root,
            loaded,
            order,
            ..
        } = self;

        let capacity: usize = loaded.iter().map(|m| m.source.len() + 128).sum();
        let mut bytes: Vec<u8> = Vec::with_capacity(capacity + 1);
        let mut hasher = Sha256::new();
        let append = |bytes: &mut Vec<u8>, hasher: &mut Sha256, data: &[u8]| {
            bytes.extend_from_slice(data);
            hasher.update(data);
        };

        // loaded index → final unit-order id
        let mut final_id = vec![0u32; loaded.len()];
        for (position, &index) in order.iter().enumerate() {
            final_id[index] = position as u32;
        }

        let mut modules: Vec<ModuleInfo> = Vec::with_capacity(order.len());
        let mut features = Features::default();

        for &index in &order {
            let module = &loaded[index];
            let start = bytes.len() as u32;

            unit_log!("module {} at offset {}", module.name, start);

            let marker = format!("# --- module: {} ---\n", module.rel_path.display());
            append(&mut bytes, &mut hasher, marker.as_bytes());
            for (dotted, _) in &module.imports {
                let use_marker = format!("# --- use: {dotted} ---\n");
                append(&mut bytes, &mut hasher, use_marker.as_bytes());
            }

            // Source with the preamble's `use` lines stripped; everything
            // else (comments, blank lines) is preserved verbatim.
            let mut cursor = 0usize;
            for &(use_start, use_end) in &module.use_lines {
                if use_start > cursor {
                    append(&mut bytes, &mut hasher, &module.source[cursor..use_start]);
                }
                cursor = use_end;
            }
            if cursor < module.source.len() {
                append(&mut bytes, &mut hasher, &module.source[cursor..]);
            }
            append(&mut bytes, &mut hasher, b"\n\n");

            detect_features(&module.rel_path, &mut features);

            modules.push(ModuleInfo {
                name: module.name.clone(),
                rel_path: Some(module.rel_path.clone()),
                start,
                kind: if index == entry_index {
                    ModuleKind::Root
                } else {
                    ModuleKind::File
                },
                imports: module
                    .imports
                    .iter()
                    .map(|&(_, child)| ModuleId(final_id[child]))
                    .collect(),
            });
        }

        let hash: [u8; 32] = hasher.finalize().into();
        // NUL terminator for the lexer; deliberately excluded from the hash.
        bytes.push(0);

        let file_module_count = modules.len();
        let mut by_name: FxHashMap<String, ModuleId> = FxHashMap::default();
        for (id, module) in modules.iter().enumerate() {
            by_name
                .entry(module.name.clone())
                .or_insert(ModuleId(id as u32));
        }

        // Namespace modules for every proper dotted prefix, id-ordered after
        // all file modules so token module ids stay below the file count.
        let prefixes: Vec<String> = modules
            .iter()
            .flat_map(|module| {
                let name = module.name.as_str();
                name.match_indices('.')
                    .map(|(i, _)| name[..i].to_string())
                    .collect::<Vec<_>>()
            })
            .collect();
        for prefix in prefixes {
            if !by_name.contains_key(&prefix) {
                let id = ModuleId(modules.len() as u32);
                modules.push(ModuleInfo {
                    name: prefix.clone(),
                    rel_path: None,
                    start: 0,
                    kind: ModuleKind::Namespace,
                    imports: Vec::new(),
                });
                by_name.insert(prefix, id);
            }
        }

        Ok(SourceUnit {
            bytes,
            hash,
            modules,
            file_module_count,
            by_name,
            entry: ModuleId(final_id[entry_index]),
            features,
            root,
        })
    }
}

fn detect_features(rel_path: &Path, features: &mut Features) {
    for component in rel_path.components() {
        let std::path::Component::Normal(os) = component else {
            continue;
        };
        let segment = os.to_string_lossy();
        let stem = segment.strip_suffix(".as").unwrap_or(&segment);
        match stem {
            "tls" => features.insert(Features::TLS),
            "metal" | "stencil" => features.insert(Features::METAL),
            _ => {}
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// Wraps raw source text in a single-module unit (no markers), for
    /// lexer and codegen tests that do not need the resolver.
    pub fn unit_from_source(source: &str) -> SourceUnit {
        let mut bytes = source.as_bytes().to_vec();
        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        let hash: [u8; 32] = hasher.finalize().into();
        bytes.push(0);

        let modules = vec![ModuleInfo {
            name: "main".to_string(),
            rel_path: Some(PathBuf::from("src/main.as")),
            start: 0,
            kind: ModuleKind::Root,
            imports: Vec::new(),
        }];
        let by_name = [("main".to_string(), ModuleId(0))].into_iter().collect();
        SourceUnit {
            bytes,
            hash,
            modules,
            file_module_count: 1,
            by_name,
            entry: ModuleId(0),
            features: Features::default(),
            root: PathBuf::new(),
        }
    }

    /// Builds a synthetic unit whose file modules start at the given offsets.
    pub fn unit_with_module_starts(starts: &[u32]) -> SourceUnit {
        let modules: Vec<ModuleInfo> = starts
            .iter()
            .enumerate()
            .map(|(i, &start)| ModuleInfo {
                name: format!("m{i}"),
                rel_path: Some(PathBuf::from(format!("src/m{i}.as"))),
                start,
                kind: if i + 1 == starts.len() {
                    ModuleKind::Root
                } else {
                    ModuleKind::File
                },
                imports: Vec::new(),
            })
            .collect();
        let by_name = modules
            .iter()
            .enumerate()
            .map(|(i, m)| (m.name.clone(), ModuleId(i as u32)))
            .collect();
        SourceUnit {
            bytes: vec![0],
            hash: [0; 32],
            file_module_count: modules.len(),
            entry: ModuleId(starts.len().saturating_sub(1) as u32),
            modules,
            by_name,
            features: Features::default(),
            root: PathBuf::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(path: &Path, contents: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    fn unit_text(unit: &SourceUnit) -> String {
        let bytes = unit.bytes();
        assert_eq!(*bytes.last().unwrap(), 0, "unit must be NUL-terminated");
        String::from_utf8_lossy(&bytes[..bytes.len() - 1]).to_string()
    }

    #[test]
    fn single_module_unit_has_one_marker_and_no_use_markers() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(LOCKFILE_NAME), "lock_version = 0\n").unwrap();
        let entry = dir.path().join("src/main.as");
        write(&entry, "def main() returns i32\n    return 0\n");

        let unit = resolve_unit(&entry).unwrap();
        let text = unit_text(&unit);

        assert!(text.starts_with("# --- module: src/main.as ---\n"));
        assert!(!text.contains("# --- use:"));
        assert_eq!(unit.file_module_count(), 1);
        assert_eq!(unit.module(unit.entry).name, "main");
        assert_eq!(unit.module(unit.entry).kind, ModuleKind::Root);
    }

    #[test]
    fn imports_are_emitted_in_postorder_with_markers() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(LOCKFILE_NAME), "lock_version = 0\n").unwrap();
        write(
            &dir.path().join("src/core/io.as"),
            "# io helpers\nconst GREETING is String = \"hi\"\n",
        );
        write(
            &dir.path().join("src/main.as"),
            "use core.io\n\ndef main() returns i32\n    return 0\n",
        );

        let unit = resolve_unit(&dir.path().join("src/main.as")).unwrap();
        let text = unit_text(&unit);

        let io_marker = text.find("# --- module: src/core/io.as ---").unwrap();
        let main_marker = text.find("# --- module: src/main.as ---").unwrap();
        assert!(io_marker < main_marker, "imported module must precede importer");
        assert!(text.contains("# --- use: core.io ---\n"));
        assert!(!text.contains("\nuse core.io"), "use lines must be stripped");
        // Preamble comments survive verbatim.
        assert!(text.contains("# io helpers\n"));

        // The entry has the highest file module id; its import resolves.
        let entry = unit.module(unit.entry);
        assert_eq!(entry.name, "main");
        assert_eq!(entry.imports.len(), 1);
        assert_eq!(unit.module(entry.imports[0]).name, "core.io");

        // A namespace module `core` exists for qualified lookups.
        let core = unit.module_named("core").unwrap();
        assert_eq!(unit.module(core).kind, ModuleKind::Namespace);
        assert!(core.0 as usize >= unit.file_module_count());
    }

    #[test]
    fn unit_and_hash_are_deterministic() {
        let build = || {
            let dir = tempfile::tempdir().unwrap();
            fs::write(dir.path().join(LOCKFILE_NAME), "lock_version = 0\n").unwrap();
            write(&dir.path().join("src/a.as"), "const A is i32 = 1\n");
            write(&dir.path().join("src/b.as"), "use a\nconst B is i32 = 2\n");
            write(
                &dir.path().join("src/main.as"),
                "use a\nuse b\n\ndef main() returns i32\n    return 0\n",
            );
            let unit = resolve_unit(&dir.path().join("src/main.as")).unwrap();
            (unit_text(&unit), unit.hash)
        };

        let (text_a, hash_a) = build();
        let (text_b, hash_b) = build();
        assert_eq!(text_a, text_b);
        assert_eq!(hash_a, hash_b);
    }

    #[test]
    fn shared_import_is_included_once() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(LOCKFILE_NAME), "lock_version = 0\n").unwrap();
        write(&dir.path().join("src/util.as"), "const U is i32 = 9\n");
        write(&dir.path().join("src/a.as"), "use util\nconst A is i32 = 1\n");
        write(&dir.path().join("src/b.as"), "use util\nconst B is i32 = 2\n");
        write(
            &dir.path().join("src/main.as"),
            "use a\nuse b\n\ndef main() returns i32\n    return 0\n",
        );

        let unit = resolve_unit(&dir.path().join("src/main.as")).unwrap();
        let text = unit_text(&unit);
        assert_eq!(text.matches("# --- module: src/util.as ---").count(), 1);
        assert_eq!(unit.file_module_count(), 4);
    }

    #[test]
    fn lockfile_dep_imports_resolve_to_dep_src() {
        let dir = tempfile::tempdir().unwrap();
        write(
            &dir.path().join("libraries/mathlib/src/lib.as"),
            "const PI_ISH is i32 = 3\n",
        );
        write(
            &dir.path().join("libraries/mathlib/src/trig.as"),
            "const TAU_ISH is i32 = 6\n",
        );
        fs::write(
            dir.path().join(LOCKFILE_NAME),
            "lock_version = 1\ndep mathlib libraries/mathlib\n",
        )
        .unwrap();
        write(
            &dir.path().join("src/main.as"),
            "use mathlib\nuse mathlib.trig\n\ndef main() returns i32\n    return 0\n",
        );

        let unit = resolve_unit(&dir.path().join("src/main.as")).unwrap();
        let text = unit_text(&unit);
        assert!(text.contains("# --- use: mathlib ---\n"));
        assert!(text.contains("# --- use: mathlib.trig ---\n"));
        assert!(unit.module_named("mathlib").is_some());
        assert!(unit.module_named("mathlib.trig").is_some());
    }

    #[test]
    fn missing_import_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(LOCKFILE_NAME), "lock_version = 0\n").unwrap();
        write(
            &dir.path().join("src/main.as"),
            "use ghost\n\ndef main() returns i32\n    return 0\n",
        );
        assert!(resolve_unit(&dir.path().join("src/main.as")).is_err());
    }

    #[test]
    fn tls_module_path_sets_feature_flag() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(LOCKFILE_NAME), "lock_version = 0\n").unwrap();
        write(&dir.path().join("src/net/tls.as"), "const T is i32 = 1\n");
        write(
            &dir.path().join("src/main.as"),
            "use net.tls\n\ndef main() returns i32\n    return 0\n",
        );

        let unit = resolve_unit(&dir.path().join("src/main.as")).unwrap();
        assert!(unit.features.contains(Features::TLS));
        assert!(!unit.features.contains(Features::METAL));
    }

    #[test]
    fn module_names_derive_from_paths() {
        assert_eq!(module_name_from_rel(Path::new("src/main.as")), "main");
        assert_eq!(module_name_from_rel(Path::new("src/core/io.as")), "core.io");
        assert_eq!(
            module_name_from_rel(Path::new("libraries/ml/src/ops.as")),
            "ml.ops"
        );
        assert_eq!(
            module_name_from_rel(Path::new("libraries/ml/src/lib.as")),
            "ml"
        );
    }
}
