//! Executable identity and argument-vector conventions.

use once_cell::sync::Lazy;

/// Marker argument: when hosted as a shared image, the wrapper's first
/// real argument asks for the rest of argv to be passed through.
pub const PASS_ARGS_FLAG: &str = "--pass-args";

/// Environment override for the reported executable path, for hosts
/// where the OS's own notion of it is unusable.
pub const EXECUTABLE_OVERRIDE_ENV: &str = "VIREO_EXECUTABLE";

static PROGRAM_NAME: Lazy<String> = Lazy::new(resolve_program_name);

/// The executable identity surfaced to the engine.
///
/// Resolved once per process and cached.
pub fn program_name() -> &'static str {
    &PROGRAM_NAME
}

fn resolve_program_name() -> String {
    #[cfg(target_os = "linux")]
    {
        if let Ok(target) = std::fs::read_link("/proc/self/exe") {
            let target = target.to_string_lossy().into_owned();
            // An anonymous memory-backed execution target has no stable
            // path; report the indirect one instead.
            if target.contains("memfd:") {
                return format!("/proc/{}/exe", std::process::id());
            }
            return target;
        }
    }

    if let Ok(path) = std::env::var(EXECUTABLE_OVERRIDE_ENV) {
        if !path.is_empty() {
            return path;
        }
    }

    std::env::current_exe()
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_else(|_| std::env::args().next().unwrap_or_default())
}

/// Build the argument vector handed to the engine.
///
/// Standalone executables forward argv unchanged. A shared image
/// forwards only argv[0], unless its first real argument is
/// [`PASS_ARGS_FLAG`] followed by at least one more argument, where the
/// marker is discarded and argv[0] is re-pointed ahead of the rest.
/// An empty vector stays empty (the caller skips the engine call).
pub fn build_argv(args: &[String], is_shared: bool) -> Vec<String> {
    if args.is_empty() || !is_shared {
        return args.to_vec();
    }

    if args.len() > 2 && args[1] == PASS_ARGS_FLAG {
        let mut argv = Vec::with_capacity(args.len() - 1);
        argv.push(args[0].clone());
        argv.extend_from_slice(&args[2..]);
        argv
    } else {
        vec![args[0].clone()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_standalone_forwards_unchanged() {
        let argv = args(&["prog", "a", "b"]);
        assert_eq!(build_argv(&argv, false), argv);
    }

    #[test]
    fn test_shared_keeps_only_argv0() {
        assert_eq!(
            build_argv(&args(&["host", "a", "b"]), true),
            args(&["host"])
        );
    }

    #[test]
    fn test_shared_pass_args_discards_marker() {
        assert_eq!(
            build_argv(&args(&["host", "--pass-args", "a", "b"]), true),
            args(&["host", "a", "b"])
        );
    }

    #[test]
    fn test_shared_pass_args_needs_a_following_argument() {
        // A bare marker does not take effect.
        assert_eq!(
            build_argv(&args(&["host", "--pass-args"]), true),
            args(&["host"])
        );
    }

    #[test]
    fn test_empty_stays_empty() {
        assert!(build_argv(&[], true).is_empty());
        assert!(build_argv(&[], false).is_empty());
    }

    #[test]
    fn test_program_name_is_stable() {
        let first = program_name();
        let second = program_name();
        assert!(!first.is_empty());
        assert!(std::ptr::eq(first, second));
    }
}
