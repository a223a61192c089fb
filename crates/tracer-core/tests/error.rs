//! Tests for error handling

use std::io;
use std::path::PathBuf;

use tracer_core::error::{exit_status, ConfigError, TracerError};

fn not_found() -> io::Error
{
    io::Error::new(io::ErrorKind::NotFound, "No such file or directory")
}

#[test]
fn test_config_exit_codes_are_distinct()
{
    let errors = [
        ConfigError::DataPath {
            path: PathBuf::from("/nope/trace.dat"),
            source: not_found(),
        },
        ConfigError::SymbolPath {
            path: PathBuf::from("/nope/trace.sym"),
            source: not_found(),
        },
        ConfigError::Granularity("line".into()),
        ConfigError::BlockList("a\tb".into()),
    ];
    let codes: Vec<i32> = errors.iter().map(ConfigError::exit_code).collect();

    assert_eq!(
        codes,
        [
            exit_status::DATA_PATH,
            exit_status::SYMBOL_PATH,
            exit_status::GRANULARITY,
            exit_status::BLOCK_LIST,
        ]
    );
    assert_eq!(codes, [102, 103, 100, 101]);
}

#[test]
fn test_config_error_keeps_its_code_when_wrapped()
{
    let err: TracerError = ConfigError::Granularity("x".into()).into();
    assert_eq!(err.exit_code(), exit_status::GRANULARITY);
    // Transparent: same message as the inner error
    assert_eq!(err.to_string(), ConfigError::Granularity("x".into()).to_string());
}

#[test]
fn test_config_error_display()
{
    let err = ConfigError::DataPath {
        path: PathBuf::from("/nope/trace.dat"),
        source: not_found(),
    };
    let message = err.to_string();
    assert!(message.contains("/nope/trace.dat"));
    assert!(message.contains("No such file"));

    let message = ConfigError::Granularity("line".into()).to_string();
    assert!(message.contains("\"line\""));
    assert!(message.contains("ins"));
}

#[test]
fn test_host_error_exit_codes()
{
    let launch = TracerError::Launch {
        program: "./missing".into(),
        source: not_found(),
    };
    let ptrace = TracerError::Ptrace {
        operation: "PTRACE_CONT",
        tid: 1234,
        source: io::Error::from(io::ErrorKind::PermissionDenied),
    };

    assert_eq!(launch.exit_code(), exit_status::ENGINE);
    assert_eq!(ptrace.exit_code(), exit_status::ENGINE);
    assert_eq!(TracerError::Unsupported("macOS".into()).exit_code(), exit_status::ENGINE);
    assert_eq!(TracerError::SymbolLoad("stripped".into()).exit_code(), exit_status::SYMBOL_LOAD);
    assert!(ptrace.to_string().contains("PTRACE_CONT"));
    assert!(ptrace.to_string().contains("1234"));
}

#[test]
fn test_stream_write_error()
{
    let err = TracerError::StreamWrite {
        written: 42,
        source: io::Error::new(io::ErrorKind::StorageFull, "disk full"),
    };
    assert_eq!(err.exit_code(), exit_status::STREAM_WRITE);
    assert!(err.to_string().contains("42 events"));
}

#[test]
fn test_error_source_chain()
{
    use std::error::Error;

    let err = TracerError::StreamWrite {
        written: 0,
        source: io::Error::new(io::ErrorKind::StorageFull, "disk full"),
    };
    let source = err.source().unwrap();
    assert_eq!(source.to_string(), "disk full");
}
