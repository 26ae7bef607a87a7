//! Modification-time aware parse cache backed by a parser pool.
//!
//! [`ParseCache::parse`] returns the parsed body of a file, parsing it at
//! most once per observed modification time. Parse failures are cached
//! the same way as successes. Concurrent requests for the same path
//! share one parse.

use std::fs;
use std::ops::{Deref, DerefMut};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::SystemTime;

use parking_lot::Mutex;
use stackgraph_common::coalesce::CoalescingMap;
use stackgraph_common::error::{Result, StackgraphError};
use stackgraph_common::paths::{modified_time, normalize};

use crate::SyntaxError;
use crate::ast::Body;
use crate::parser::{Dialect, Parser};

/// Idle parsers kept for reuse; extra instances are dropped on release.
const MAX_IDLE_PARSERS: usize = 64;

/// A cached parse outcome.
#[derive(Debug)]
pub struct ParsedFile {
    /// Absolute path of the file.
    pub path: PathBuf,
    /// Modification time observed before the file was read.
    pub modified: Option<SystemTime>,
    /// Parsed body, or the error the parse produced.
    pub result: Result<Arc<Body>>,
}

impl ParsedFile {
    /// Borrows the body, or clones the cached error.
    ///
    /// # Errors
    ///
    /// Returns the cached parse or I/O error.
    pub fn body(&self) -> Result<&Body> {
        self.result.as_deref().map_err(Clone::clone)
    }
}

/// A pool of reusable [`Parser`] instances.
#[derive(Debug, Default)]
pub struct ParserPool {
    idle: Mutex<Vec<Parser>>,
    created: AtomicUsize,
}

impl ParserPool {
    /// Creates an empty pool.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes an idle parser, or creates one. The parser goes back to the
    /// pool when the guard is dropped, on every exit path.
    pub fn acquire(&self) -> PooledParser<'_> {
        let parser = self.idle.lock().pop().unwrap_or_else(|| {
            let _ = self.created.fetch_add(1, Ordering::Relaxed);
            Parser::new()
        });
        PooledParser { parser, pool: self }
    }

    /// Number of parsers created over the pool's lifetime.
    #[must_use]
    pub fn created(&self) -> usize {
        self.created.load(Ordering::Relaxed)
    }

    /// Number of parsers currently idle.
    #[must_use]
    pub fn idle(&self) -> usize {
        self.idle.lock().len()
    }

    fn release(&self, mut parser: Parser) {
        parser.reset();
        let mut idle = self.idle.lock();
        if idle.len() < MAX_IDLE_PARSERS {
            idle.push(parser);
        }
    }
}

/// Scoped handle to a pooled parser.
#[derive(Debug)]
pub struct PooledParser<'a> {
    parser: Parser,
    pool: &'a ParserPool,
}

impl Deref for PooledParser<'_> {
    type Target = Parser;

    fn deref(&self) -> &Parser {
        &self.parser
    }
}

impl DerefMut for PooledParser<'_> {
    fn deref_mut(&mut self) -> &mut Parser {
        &mut self.parser
    }
}

impl Drop for PooledParser<'_> {
    fn drop(&mut self) {
        self.pool.release(std::mem::take(&mut self.parser));
    }
}

/// Cache of parsed configuration files keyed by absolute path.
#[derive(Debug, Default)]
pub struct ParseCache {
    entries: CoalescingMap<PathBuf, ParsedFile>,
    pool: ParserPool,
}

impl ParseCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the parse outcome for `path`.
    ///
    /// The cached outcome is reused while the file's modification time is
    /// unchanged; otherwise the file is parsed again.
    pub fn parse(&self, path: &Path) -> Arc<ParsedFile> {
        let key = normalize(path);
        self.entries.get_or_compute(
            &key,
            |entry| modified_time(&entry.path) == entry.modified,
            || self.load(&key),
        )
    }

    /// Like [`ParseCache::parse`] but yields the body directly.
    ///
    /// # Errors
    ///
    /// Returns the (possibly cached) parse or I/O error for the file.
    pub fn parse_body(&self, path: &Path) -> Result<Arc<Body>> {
        self.parse(path).result.clone()
    }

    /// Number of parses actually performed.
    #[must_use]
    pub fn parse_count(&self) -> usize {
        self.entries.computations()
    }

    /// Number of cached files.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drops every cached entry.
    pub fn clear(&self) {
        self.entries.clear();
    }

    /// The parser pool backing this cache.
    #[must_use]
    pub const fn pool(&self) -> &ParserPool {
        &self.pool
    }

    fn load(&self, path: &Path) -> ParsedFile {
        // Observed before reading so a concurrent write leaves a stale stamp.
        let modified = modified_time(path);
        let result = fs::read_to_string(path)
            .map_err(|e| StackgraphError::io(path, e))
            .and_then(|source| self.parse_source(path, &source));
        match &result {
            Ok(_) => tracing::debug!(path = %path.display(), "parsed configuration file"),
            Err(e) => tracing::debug!(path = %path.display(), error = %e, "caching parse failure"),
        }
        ParsedFile {
            path: path.to_path_buf(),
            modified,
            result,
        }
    }

    fn parse_source(&self, path: &Path, source: &str) -> Result<Arc<Body>> {
        let dialect = Dialect::for_path(path);
        let mut parser = self.pool.acquire();
        guarded_parse(path, || parser.parse(source, dialect))
    }
}

/// Runs `parse`, turning a syntax error or a panic into
/// [`StackgraphError::Parse`] for `path`.
fn guarded_parse<F>(path: &Path, parse: F) -> Result<Arc<Body>>
where
    F: FnOnce() -> std::result::Result<Body, SyntaxError>,
{
    match catch_unwind(AssertUnwindSafe(parse)) {
        Ok(Ok(body)) => Ok(Arc::new(body)),
        Ok(Err(syntax)) => Err(StackgraphError::Parse {
            path: path.to_path_buf(),
            message: syntax.message,
        }),
        Err(panic) => {
            let detail = panic
                .downcast_ref::<&str>()
                .map(|s| (*s).to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            tracing::warn!(path = %path.display(), %detail, "parser panicked");
            Err(StackgraphError::Parse {
                path: path.to_path_buf(),
                message: format!("parser panicked: {detail}"),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fs::File;
    use std::time::Duration;

    use super::*;

    fn bump_mtime(path: &Path) {
        let file = File::options().write(true).open(path).expect("open");
        file.set_modified(SystemTime::now() + Duration::from_secs(60))
            .expect("set mtime");
    }

    #[test]
    fn unchanged_file_is_not_reparsed() {
        let dir = tempfile::tempdir().expect("tempdir");
        let file = dir.path().join("terragrunt.hcl");
        fs::write(&file, "locals {\n  a = 1\n}\n").expect("write");

        let cache = ParseCache::new();
        let first = cache.parse(&file);
        let second = cache.parse(&file);
        assert!(first.body().is_ok());
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.parse_count(), 1);
    }

    #[test]
    fn touched_file_is_reparsed() {
        let dir = tempfile::tempdir().expect("tempdir");
        let file = dir.path().join("terragrunt.hcl");
        fs::write(&file, "a = 1\n").expect("write");

        let cache = ParseCache::new();
        let _ = cache.parse(&file);
        fs::write(&file, "b = 2\n").expect("rewrite");
        bump_mtime(&file);
        let reparsed = cache.parse(&file);

        assert_eq!(cache.parse_count(), 2);
        assert!(reparsed.body().expect("body").attribute("b").is_some());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn parse_errors_are_cached() {
        let dir = tempfile::tempdir().expect("tempdir");
        let file = dir.path().join("broken.hcl");
        fs::write(&file, "locals { invalid syntax").expect("write");

        let cache = ParseCache::new();
        let first = cache.parse_body(&file);
        let second = cache.parse_body(&file);
        assert!(matches!(first, Err(StackgraphError::Parse { .. })));
        assert!(matches!(second, Err(StackgraphError::Parse { .. })));
        assert_eq!(cache.parse_count(), 1);
        // The parser was handed back despite the failure.
        assert_eq!(cache.pool().idle(), 1);
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cache = ParseCache::new();
        let result = cache.parse_body(&dir.path().join("absent.hcl"));
        assert!(matches!(result, Err(StackgraphError::Io { .. })));
    }

    #[test]
    fn json_files_use_json_dialect() {
        let dir = tempfile::tempdir().expect("tempdir");
        let file = dir.path().join("main.tf.json");
        fs::write(&file, r#"{ "module": { "m": { "source": "./m" } } }"#).expect("write");
        let cache = ParseCache::new();
        let body = cache.parse_body(&file).expect("should parse");
        assert_eq!(body.blocks_of("module").count(), 1);
    }

    #[test]
    fn pool_reuses_released_parsers() {
        let pool = ParserPool::new();
        {
            let _a = pool.acquire();
            let _b = pool.acquire();
            assert_eq!(pool.created(), 2);
        }
        assert_eq!(pool.idle(), 2);
        let _c = pool.acquire();
        assert_eq!(pool.created(), 2);
        assert_eq!(pool.idle(), 1);
    }

    #[test]
    fn parser_panic_becomes_parse_error_and_returns_parser() {
        let pool = ParserPool::new();
        let path = Path::new("/repo/app/terragrunt.hcl");
        let result = guarded_parse(path, || {
            let _parser = pool.acquire();
            panic!("unexpected token state");
        });

        let Err(StackgraphError::Parse { path: failed, message }) = result else {
            panic!("expected parse error, got {result:?}");
        };
        assert_eq!(failed, path);
        assert_eq!(message, "parser panicked: unexpected token state");
        assert_eq!(pool.idle(), 1);
    }

    #[test]
    fn clear_empties_cache() {
        let dir = tempfile::tempdir().expect("tempdir");
        let file = dir.path().join("a.hcl");
        fs::write(&file, "a = 1").expect("write");
        let cache = ParseCache::new();
        let _ = cache.parse(&file);
        cache.clear();
        assert!(cache.is_empty());
        let _ = cache.parse(&file);
        assert_eq!(cache.parse_count(), 2);
    }
}
