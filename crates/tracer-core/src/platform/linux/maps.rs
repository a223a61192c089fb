//! `/proc/<pid>/maps` parsing.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use super::ptrace::Tid;

/// One line of `/proc/<pid>/maps`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) struct Mapping
{
    pub start: u64,
    pub end: u64,
    pub offset: u64,
    pub executable: bool,
    /// Backing file, or a pseudo-path such as `[vdso]`; `None` if anonymous.
    pub path: Option<PathBuf>,
}

impl Mapping
{
    pub fn contains(&self, address: u64) -> bool
    {
        (self.start..self.end).contains(&address)
    }
}

/// Read the current mappings of `pid`.
pub(super) fn read(pid: Tid) -> io::Result<Vec<Mapping>>
{
    let contents = fs::read_to_string(format!("/proc/{pid}/maps"))?;
    Ok(parse(&contents))
}

/// Parse the text of a maps file, skipping malformed lines.
pub(super) fn parse(contents: &str) -> Vec<Mapping>
{
    contents.lines().filter_map(parse_line).collect()
}

fn parse_line(line: &str) -> Option<Mapping>
{
    // address perms offset dev inode [path]
    let mut fields = line.splitn(6, ' ');
    let (start, end) = fields.next()?.split_once('-')?;
    let perms = fields.next()?;
    let offset = fields.next()?;
    let _dev = fields.next()?;
    let _inode = fields.next()?;
    let path = fields
        .next()
        .map(str::trim)
        .filter(|path| !path.is_empty())
        .map(|path| PathBuf::from(path.strip_suffix(" (deleted)").unwrap_or(path)));

    Some(Mapping {
        start: u64::from_str_radix(start, 16).ok()?,
        end: u64::from_str_radix(end, 16).ok()?,
        offset: u64::from_str_radix(offset, 16).ok()?,
        executable: perms.as_bytes().get(2) == Some(&b'x'),
        path,
    })
}

/// The mapping containing `address`.
pub(super) fn find(mappings: &[Mapping], address: u64) -> Option<&Mapping>
{
    mappings.iter().find(|mapping| mapping.contains(address))
}

/// Runtime minus link-time address for the image backed by `path`.
///
/// The image's first mapping (file offset 0) starts at the page of its
/// lowest loadable segment.
pub(super) fn load_bias(mappings: &[Mapping], path: &Path, lowest_vaddr: u64) -> Option<u64>
{
    let base = mappings
        .iter()
        .filter(|mapping| mapping.offset == 0 && mapping.path.as_deref() == Some(path))
        .map(|mapping| mapping.start)
        .min()?;
    Some(base.wrapping_sub(lowest_vaddr & !0xfff))
}

#[cfg(test)]
mod tests
{
    use super::*;

    const MAPS: &str = "\
55d0c2a00000-55d0c2a02000 r--p 00000000 08:01 1234                       /usr/bin/target
55d0c2a02000-55d0c2a06000 r-xp 00002000 08:01 1234                       /usr/bin/target
55d0c3a00000-55d0c3a21000 rw-p 00000000 00:00 0                          [heap]
7f1e2c000000-7f1e2c028000 r--p 00000000 08:01 5678                       /usr/lib/libc.so.6
7f1e2c028000-7f1e2c1bd000 r-xp 00028000 08:01 5678                       /usr/lib/libc.so.6
7f1e2c300000-7f1e2c304000 rw-p 00000000 00:00 0
7ffd1a5fe000-7ffd1a600000 r-xp 00000000 00:00 0                          [vdso]
7f1e2c400000-7f1e2c401000 r-xp 00000000 08:01 9999                       /tmp/my lib.so (deleted)
";

    #[test]
    fn test_parse_lines()
    {
        let mappings = parse(MAPS);
        assert_eq!(mappings.len(), 8);

        let text = &mappings[1];
        assert_eq!(text.start, 0x55d0_c2a0_2000);
        assert_eq!(text.end, 0x55d0_c2a0_6000);
        assert_eq!(text.offset, 0x2000);
        assert!(text.executable);
        assert_eq!(text.path.as_deref(), Some(Path::new("/usr/bin/target")));

        assert!(!mappings[0].executable);
        assert_eq!(mappings[5].path, None);
        assert_eq!(mappings[6].path.as_deref(), Some(Path::new("[vdso]")));
        assert_eq!(mappings[7].path.as_deref(), Some(Path::new("/tmp/my lib.so")));
    }

    #[test]
    fn test_malformed_lines_are_skipped()
    {
        let mappings = parse("garbage\n1000-2000 r-xp 0 08:01 1 /bin/x\nzz-yy r-xp 0 0 0\n");
        assert_eq!(mappings.len(), 1);
        assert_eq!(mappings[0].start, 0x1000);
    }

    #[test]
    fn test_find_and_bias()
    {
        let mappings = parse(MAPS);
        let libc = find(&mappings, 0x7f1e_2c03_0000).unwrap();
        assert_eq!(libc.path.as_deref(), Some(Path::new("/usr/lib/libc.so.6")));
        assert!(find(&mappings, 0x1000).is_none());

        // PIE linked at 0
        assert_eq!(load_bias(&mappings, Path::new("/usr/bin/target"), 0), Some(0x55d0_c2a0_0000));
        // Non-PIE linked where it is mapped
        let fixed = parse("400000-401000 r--p 00000000 08:01 1 /bin/fixed\n");
        assert_eq!(load_bias(&fixed, Path::new("/bin/fixed"), 0x40_0040), Some(0));
        assert_eq!(load_bias(&mappings, Path::new("/bin/absent"), 0), None);
    }
}
