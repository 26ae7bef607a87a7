//! System-wide constants: file names, dialect globs, and recognized locals.

/// Default configuration file name for a project.
pub const DEFAULT_CONFIG_FILE: &str = "terragrunt.hcl";

/// Default file name searched by `find_in_parent_folders()` without arguments.
pub const DEFAULT_PARENT_FILE: &str = "terragrunt.hcl";

/// File patterns scanned for module calls in a module directory.
pub const MODULE_FILE_PATTERNS: [&str; 4] = ["*.tf", "*.tf.json", "*.tofu", "*.tofu.json"];

/// Trigger globs emitted per discovered local module directory.
pub const MODULE_TRIGGER_GLOBS: [&str; 2] = ["*.tf*", "*.tofu*"];

/// Trigger globs every project depends on, relative to its own directory.
pub const PROJECT_TRIGGER_GLOBS: [&str; 2] = ["*.hcl", "*.tf*"];

/// Relative-path prefixes marking a local module source, in both separator conventions.
pub const LOCAL_SOURCE_PREFIXES: [&str; 4] = ["./", "../", ".\\", "..\\"];

/// Recognized key: workflow name.
pub const LOCAL_WORKFLOW: &str = "atlantis_workflow";
/// Recognized key: tool version.
pub const LOCAL_TERRAFORM_VERSION: &str = "atlantis_terraform_version";
/// Recognized key: autoplan flag.
pub const LOCAL_AUTOPLAN: &str = "atlantis_autoplan";
/// Recognized key: skip flag.
pub const LOCAL_SKIP: &str = "atlantis_skip";
/// Recognized key: apply requirements list.
pub const LOCAL_APPLY_REQUIREMENTS: &str = "atlantis_apply_requirements";
/// Recognized key: extra dependency paths.
pub const LOCAL_EXTRA_DEPENDENCIES: &str = "extra_atlantis_dependencies";
/// Recognized key: project marker flag.
pub const LOCAL_PROJECT_MARKER: &str = "atlantis_project";

/// Every recognized key, in the order they are read.
pub const RECOGNIZED_LOCALS: [&str; 7] = [
    LOCAL_WORKFLOW,
    LOCAL_TERRAFORM_VERSION,
    LOCAL_AUTOPLAN,
    LOCAL_SKIP,
    LOCAL_PROJECT_MARKER,
    LOCAL_APPLY_REQUIREMENTS,
    LOCAL_EXTRA_DEPENDENCIES,
];

/// Application name used in CLI output.
pub const APP_NAME: &str = "stackgraph";

/// Output document version (Atlantis repo config schema).
pub const OUTPUT_VERSION: u32 = 3;
