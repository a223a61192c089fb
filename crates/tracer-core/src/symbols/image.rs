//! Executable parsing: sections and function symbols.
//!
//! Hosts that run the target themselves (the `ptrace` engine) have no
//! symbol service to ask, so they read the main executable with `object`,
//! relocate everything by the load bias, and answer
//! [`HostEngine::routine_at`](crate::engine::HostEngine::routine_at) from the
//! sorted routine table.

use std::fs;
use std::path::{Path, PathBuf};

use object::{Object, ObjectKind, ObjectSection, ObjectSegment, ObjectSymbol, SymbolKind};

use super::demangle::demangle_name;
use crate::engine::{ImageInfo, RoutineInfo, SectionInfo};
use crate::error::{TracerError, TracerResult};
use crate::types::Address;

/// An allocated section of the executable, at its runtime address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageSection
{
    pub name: String,
    pub address: Address,
    pub size: u64,
}

impl ImageSection
{
    fn contains(&self, address: Address) -> bool
    {
        address
            .offset_from(self.address)
            .is_some_and(|offset| offset < self.size)
    }
}

/// A function symbol, at its runtime address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRoutine
{
    /// Demangled name.
    pub name: String,
    pub address: Address,
    /// Size from the symbol table; `0` when unknown.
    pub size: u64,
}

/// Sections and routines of one executable
#[derive(Debug, Clone)]
pub struct ExecutableImage
{
    path: PathBuf,
    position_independent: bool,
    lowest_vaddr: u64,
    entry: u64,
    bias: u64,
    sections: Vec<ImageSection>,
    routines: Vec<ImageRoutine>,
}

impl ExecutableImage
{
    /// Read and parse the executable at `path`, unrelocated.
    ///
    /// ## Errors
    ///
    /// [`TracerError::SymbolLoad`] if the file cannot be read or is not an
    /// object file `object` understands.
    pub fn open(path: &Path) -> TracerResult<Self>
    {
        let data = fs::read(path).map_err(|err| TracerError::SymbolLoad(format!("cannot read {}: {err}", path.display())))?;
        Self::parse(path, &data)
    }

    /// Parse an in-memory executable.
    ///
    /// ## Errors
    ///
    /// [`TracerError::SymbolLoad`] if `data` is not a parseable object file.
    pub fn parse(path: &Path, data: &[u8]) -> TracerResult<Self>
    {
        let file = object::File::parse(data)
            .map_err(|err| TracerError::SymbolLoad(format!("failed to parse {}: {err}", path.display())))?;

        let sections = file
            .sections()
            .filter(|section| section.address() != 0 && section.size() != 0)
            .filter_map(|section| {
                Some(ImageSection {
                    name: section.name().ok()?.to_string(),
                    address: Address::new(section.address()),
                    size: section.size(),
                })
            })
            .collect();

        let mut routines = collect_routines(file.symbols());
        if routines.is_empty() {
            // Stripped binaries still export their dynamic symbols
            routines = collect_routines(file.dynamic_symbols());
        }

        let lowest_vaddr = file
            .segments()
            .filter(|segment| segment.size() != 0)
            .map(|segment| segment.address())
            .min()
            .unwrap_or(0);

        Ok(Self::from_parts(
            path.to_path_buf(),
            file.kind() == ObjectKind::Dynamic,
            lowest_vaddr,
            file.entry(),
            sections,
            routines,
        ))
    }

    pub(crate) fn from_parts(
        path: PathBuf,
        position_independent: bool,
        lowest_vaddr: u64,
        entry: u64,
        sections: Vec<ImageSection>,
        mut routines: Vec<ImageRoutine>,
    ) -> Self
    {
        routines.sort_by(|a, b| a.address.cmp(&b.address).then_with(|| a.name.cmp(&b.name)));
        // Aliases share an address; keep one name per entry point
        routines.dedup_by_key(|routine| routine.address);
        Self {
            path,
            position_independent,
            lowest_vaddr,
            entry,
            bias: 0,
            sections,
            routines,
        }
    }

    /// Move every address by `bias` (runtime minus link-time address).
    #[must_use]
    pub fn relocated(mut self, bias: u64) -> Self
    {
        let delta = bias.wrapping_sub(self.bias);
        for section in &mut self.sections {
            section.address = section.address + delta;
        }
        for routine in &mut self.routines {
            routine.address = routine.address + delta;
        }
        self.bias = bias;
        self
    }

    /// Path the image was read from.
    pub fn path(&self) -> &Path
    {
        &self.path
    }

    /// Whether the image is a PIE or shared object (loaded at a random base).
    pub fn is_position_independent(&self) -> bool
    {
        self.position_independent
    }

    /// Link-time address of the lowest loadable segment.
    pub fn lowest_vaddr(&self) -> u64
    {
        self.lowest_vaddr
    }

    /// Current relocation bias.
    pub fn bias(&self) -> u64
    {
        self.bias
    }

    /// Runtime entry point.
    pub fn entry(&self) -> Address
    {
        Address::new(self.entry.wrapping_add(self.bias))
    }

    /// Allocated sections, relocated.
    pub fn sections(&self) -> &[ImageSection]
    {
        &self.sections
    }

    /// Function symbols sorted by address, relocated.
    pub fn routines(&self) -> &[ImageRoutine]
    {
        &self.routines
    }

    /// The section containing `address`.
    pub fn section_at(&self, address: Address) -> Option<&ImageSection>
    {
        self.sections.iter().find(|section| section.contains(address))
    }

    /// The routine containing `address`.
    ///
    /// A routine with an unknown size extends to the next routine or the end
    /// of its section, whichever comes first.
    pub fn routine_at(&self, address: Address) -> Option<&ImageRoutine>
    {
        let index = self.routines.partition_point(|routine| routine.address <= address);
        let routine = self.routines.get(index.checked_sub(1)?)?;
        let offset = address.offset_from(routine.address)?;

        if routine.size != 0 {
            return (offset < routine.size).then_some(routine);
        }

        let next = self.routines.get(index).map(|next| next.address);
        let section = self.section_at(routine.address)?;
        let in_section = section.contains(address);
        let before_next = next.is_none_or(|next| address < next);
        (in_section && before_next).then_some(routine)
    }

    /// Describe `routine` for the dispatcher, owned by `image`.
    pub fn routine_info(&self, routine: &ImageRoutine, image: &ImageInfo) -> RoutineInfo
    {
        RoutineInfo {
            name: routine.name.clone(),
            address: routine.address,
            section: self.section_at(routine.address).map(|section| SectionInfo {
                name: section.name.clone(),
                address: section.address,
            }),
            image: Some(image.clone()),
        }
    }
}

fn collect_routines<'data, I, S>(symbols: I) -> Vec<ImageRoutine>
where
    I: Iterator<Item = S>,
    S: ObjectSymbol<'data>,
{
    symbols
        .filter(|symbol| symbol.kind() == SymbolKind::Text && symbol.is_definition() && symbol.address() != 0)
        .filter_map(|symbol| {
            let name = symbol.name().ok()?;
            if name.is_empty() {
                return None;
            }
            Some(ImageRoutine {
                name: demangle_name(name),
                address: Address::new(symbol.address()),
                size: symbol.size(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests
{
    use super::*;

    fn image() -> ExecutableImage
    {
        let sections = vec![
            ImageSection {
                name: ".init".into(),
                address: Address::new(0x1000),
                size: 0x20,
            },
            ImageSection {
                name: ".text".into(),
                address: Address::new(0x1040),
                size: 0x200,
            },
        ];
        let routines = vec![
            ImageRoutine {
                name: "compute".into(),
                address: Address::new(0x1100),
                size: 0x40,
            },
            ImageRoutine {
                name: "_start".into(),
                address: Address::new(0x1040),
                size: 0,
            },
            ImageRoutine {
                name: "main".into(),
                address: Address::new(0x1080),
                size: 0x30,
            },
            ImageRoutine {
                name: "main_alias".into(),
                address: Address::new(0x1080),
                size: 0x30,
            },
        ];
        ExecutableImage::from_parts(PathBuf::from("/bin/target"), true, 0, 0x1040, sections, routines)
    }

    #[test]
    fn test_routines_are_sorted_and_deduplicated()
    {
        let image = image();
        let names: Vec<_> = image.routines().iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, ["_start", "main", "compute"]);
    }

    #[test]
    fn test_routine_lookup_by_size()
    {
        let image = image();
        assert_eq!(image.routine_at(Address::new(0x1080)).unwrap().name, "main");
        assert_eq!(image.routine_at(Address::new(0x10af)).unwrap().name, "main");
        // Gap between main and compute
        assert!(image.routine_at(Address::new(0x10b0)).is_none());
        assert_eq!(image.routine_at(Address::new(0x113f)).unwrap().name, "compute");
        assert!(image.routine_at(Address::new(0x1140)).is_none());
        assert!(image.routine_at(Address::new(0x0fff)).is_none());
    }

    #[test]
    fn test_sizeless_routine_extends_to_next()
    {
        let image = image();
        assert_eq!(image.routine_at(Address::new(0x1050)).unwrap().name, "_start");
        assert_eq!(image.routine_at(Address::new(0x107f)).unwrap().name, "_start");
    }

    #[test]
    fn test_relocation_moves_everything()
    {
        let image = image().relocated(0x5555_0000_0000);
        assert_eq!(image.entry(), Address::new(0x5555_0000_1040));
        assert_eq!(image.sections()[1].address, Address::new(0x5555_0000_1040));

        let routine = image.routine_at(Address::new(0x5555_0000_1104)).unwrap();
        assert_eq!(routine.name, "compute");

        let info = image.routine_info(
            routine,
            &ImageInfo {
                name: "/bin/target".into(),
                is_main: true,
            },
        );
        assert_eq!(info.section.unwrap().name, ".text");

        // Relocating twice is relative to the original addresses
        let image = image.relocated(0);
        assert_eq!(image.entry(), Address::new(0x1040));
    }

    #[test]
    fn test_rejects_non_object_data()
    {
        let err = ExecutableImage::parse(Path::new("notes.txt"), b"plain text").unwrap_err();
        assert!(matches!(err, TracerError::SymbolLoad(_)));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_parses_own_executable()
    {
        let exe = std::env::current_exe().unwrap();
        let image = ExecutableImage::open(&exe).unwrap();

        assert!(!image.routines().is_empty());
        assert!(image.sections().iter().any(|section| section.name == ".text"));
        let first = &image.routines()[0];
        assert_eq!(image.routine_at(first.address).map(|r| r.address), Some(first.address));
    }
}
