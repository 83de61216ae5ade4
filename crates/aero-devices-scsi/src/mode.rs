//! Mode page store backing MODE SENSE / MODE SELECT.
//!
//! Every page is kept in four forms: the power-on default, the changeable-bit mask, the current
//! value and the saved value. Pages are stored in their wire layout, `{code, length, bytes..}`,
//! so MODE SENSE can copy them out directly.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::sense::Sense;

pub const PAGE_ERROR_RECOVERY: u8 = 0x01;
pub const PAGE_DISCONNECT_RECONNECT: u8 = 0x02;
pub const PAGE_CDROM: u8 = 0x0D;
pub const PAGE_AUDIO_CONTROL: u8 = 0x0E;
pub const PAGE_CAPABILITIES: u8 = 0x2A;
pub const PAGE_IOMEGA: u8 = 0x2F;
/// MODE SENSE page code requesting every supported page.
pub const PAGE_ALL: u8 = 0x3F;

/// Parameters-savable bit in byte 0 of a page returned by MODE SENSE.
const PAGE_PS: u8 = 0x80;

#[derive(Debug, Error)]
pub enum ModePageError {
    #[error("mode page I/O failed: {0}")]
    Io(#[from] io::Error),
    #[error("saved mode page data truncated at offset {offset}")]
    Truncated { offset: usize },
    #[error("saved mode page {code:#04x} is not supported by this drive")]
    UnknownPage { code: u8 },
    #[error("saved mode page {code:#04x} has length {found}, expected {expected}")]
    LengthMismatch {
        code: u8,
        expected: usize,
        found: usize,
    },
}

/// MODE SENSE page-control field (CDB byte 2, bits 7-6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageControl {
    Current,
    Changeable,
    Default,
    Saved,
}

impl PageControl {
    pub fn from_cdb_byte(byte2: u8) -> Self {
        match byte2 >> 6 {
            0 => PageControl::Current,
            1 => PageControl::Changeable,
            2 => PageControl::Default,
            _ => PageControl::Saved,
        }
    }
}

/// One form of every page a drive supports, keyed by page code.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModePageSet {
    pages: BTreeMap<u8, Vec<u8>>,
}

impl ModePageSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a page given in wire layout. The page length byte must match the slice.
    pub fn with_page(mut self, page: &[u8]) -> Self {
        self.insert(page.to_vec());
        self
    }

    pub fn insert(&mut self, mut page: Vec<u8>) {
        debug_assert!(page.len() >= 2 && usize::from(page[1]) + 2 == page.len());
        page[0] &= 0x3F;
        self.pages.insert(page[0], page);
    }

    pub fn get(&self, code: u8) -> Option<&[u8]> {
        self.pages.get(&code).map(Vec::as_slice)
    }

    pub fn get_mut(&mut self, code: u8) -> Option<&mut [u8]> {
        self.pages.get_mut(&code).map(Vec::as_mut_slice)
    }

    pub fn contains(&self, code: u8) -> bool {
        self.pages.contains_key(&code)
    }

    pub fn codes(&self) -> impl Iterator<Item = u8> + '_ {
        self.pages.keys().copied()
    }
}

#[derive(Debug, Clone)]
pub struct ModePageStore {
    default: ModePageSet,
    changeable: ModePageSet,
    current: ModePageSet,
    saved: ModePageSet,
    saveable: u64,
}

impl ModePageStore {
    /// `changeable` must hold a mask for every page in `default`; missing masks mean "nothing
    /// changeable".
    pub fn new(default: ModePageSet, changeable: ModePageSet, saveable: &[u8]) -> Self {
        let mut mask = ModePageSet::new();
        for code in default.codes() {
            let len = default.get(code).map_or(2, <[u8]>::len);
            let mut page = vec![0u8; len];
            if let Some(ch) = changeable.get(code) {
                let n = ch.len().min(len);
                page[2..n].copy_from_slice(&ch[2..n]);
            }
            page[0] = code;
            page[1] = (len - 2) as u8;
            mask.insert(page);
        }

        let saveable = saveable
            .iter()
            .filter(|&&code| default.contains(code))
            .fold(0u64, |acc, &code| acc | (1 << (code & 0x3F)));

        Self {
            current: default.clone(),
            saved: default.clone(),
            default,
            changeable: mask,
            saveable,
        }
    }

    pub fn has_page(&self, code: u8) -> bool {
        self.default.contains(code)
    }

    pub fn is_saveable(&self, code: u8) -> bool {
        (self.saveable >> (code & 0x3F)) & 1 != 0
    }

    pub fn current(&self, code: u8) -> Option<&[u8]> {
        self.current.get(code)
    }

    /// Direct access for values the drive maintains itself (e.g. current speed).
    pub fn current_mut(&mut self, code: u8) -> Option<&mut [u8]> {
        self.current.get_mut(code)
    }

    fn form(&self, pc: PageControl) -> &ModePageSet {
        match pc {
            PageControl::Current => &self.current,
            PageControl::Changeable => &self.changeable,
            PageControl::Default => &self.default,
            PageControl::Saved => &self.saved,
        }
    }

    /// Page blocks for MODE SENSE, or `None` when the page is not supported.
    pub fn sense(&self, pc: PageControl, code: u8) -> Option<Vec<u8>> {
        let form = self.form(pc);
        let codes: Vec<u8> = if code == PAGE_ALL {
            form.codes().collect()
        } else if form.contains(code) {
            vec![code]
        } else {
            return None;
        };

        let mut out = Vec::new();
        for code in codes {
            let Some(page) = form.get(code) else {
                continue;
            };
            let start = out.len();
            out.extend_from_slice(page);
            if self.is_saveable(code) {
                out[start] |= PAGE_PS;
            }
        }
        Some(out)
    }

    /// Applies a MODE SELECT parameter page list (header and block descriptors already
    /// stripped). The whole list is validated before anything is written. Returns the codes of
    /// the pages that were applied.
    pub fn select(&mut self, params: &[u8]) -> Result<Vec<u8>, Sense> {
        let pages = self.split_pages(params)?;

        for &(code, offset) in &pages {
            let current = self.current.get(code).ok_or(Sense::INVALID_FIELD_IN_PARAMETER_LIST)?;
            let mask = self
                .changeable
                .get(code)
                .ok_or(Sense::INVALID_FIELD_IN_PARAMETER_LIST)?;
            let new = &params[offset..offset + current.len()];
            let illegal = new[2..]
                .iter()
                .zip(&current[2..])
                .zip(&mask[2..])
                .any(|((n, c), m)| (n ^ c) & !m != 0);
            if illegal {
                return Err(Sense::INVALID_FIELD_IN_PARAMETER_LIST);
            }
        }

        let mut applied = Vec::with_capacity(pages.len());
        for (code, offset) in pages {
            if let Some(page) = self.current.get_mut(code) {
                let len = page.len();
                page[2..].copy_from_slice(&params[offset + 2..offset + len]);
                applied.push(code);
            }
        }
        Ok(applied)
    }

    fn split_pages(&self, params: &[u8]) -> Result<Vec<(u8, usize)>, Sense> {
        let mut pages = Vec::new();
        let mut offset = 0;
        while offset < params.len() {
            let header = params
                .get(offset..offset + 2)
                .ok_or(Sense::INVALID_FIELD_IN_PARAMETER_LIST)?;
            let code = header[0] & 0x3F;
            let len = usize::from(header[1]) + 2;
            let expected = self
                .current
                .get(code)
                .map(<[u8]>::len)
                .ok_or(Sense::INVALID_FIELD_IN_PARAMETER_LIST)?;
            if len != expected || offset + len > params.len() {
                return Err(Sense::INVALID_FIELD_IN_PARAMETER_LIST);
            }
            pages.push((code, offset));
            offset += len;
        }
        Ok(pages)
    }

    /// Copies the current value of the given pages into the saved form. Pages that are not
    /// saveable are skipped. Returns whether anything changed.
    pub fn save(&mut self, codes: &[u8]) -> bool {
        let mut changed = false;
        for &code in codes {
            if !self.is_saveable(code) {
                continue;
            }
            if let (Some(cur), Some(saved)) = (self.current.get(code), self.saved.get_mut(code)) {
                if saved != cur {
                    saved.copy_from_slice(cur);
                    changed = true;
                }
            }
        }
        changed
    }

    /// Saveable pages in the persisted layout (concatenated wire-format pages).
    pub fn encode_saved(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for code in self.saved.codes() {
            if self.is_saveable(code) {
                if let Some(page) = self.saved.get(code) {
                    out.extend_from_slice(page);
                }
            }
        }
        out
    }

    /// Overlays persisted pages onto the saved and current forms. Only changeable bits are
    /// taken from the persisted data, so a stale file cannot alter fixed fields.
    pub fn load_saved(&mut self, data: &[u8]) -> Result<(), ModePageError> {
        let mut offset = 0;
        while offset < data.len() {
            let header = data
                .get(offset..offset + 2)
                .ok_or(ModePageError::Truncated { offset })?;
            let code = header[0] & 0x3F;
            let found = usize::from(header[1]) + 2;
            let page = data
                .get(offset..offset + found)
                .ok_or(ModePageError::Truncated { offset })?;

            let (Some(mask), true) = (self.changeable.get(code), self.is_saveable(code)) else {
                return Err(ModePageError::UnknownPage { code });
            };
            if mask.len() != found {
                return Err(ModePageError::LengthMismatch {
                    code,
                    expected: mask.len(),
                    found,
                });
            }
            let mask = mask.to_vec();

            for set in [&mut self.saved, &mut self.current] {
                if let Some(dst) = set.get_mut(code) {
                    for i in 2..found {
                        dst[i] = (dst[i] & !mask[i]) | (page[i] & mask[i]);
                    }
                }
            }
            offset += found;
        }
        Ok(())
    }
}

/// Storage for a drive's saved mode pages.
pub trait ModePagePersistence {
    /// Previously saved pages, or `None` if nothing was ever saved.
    fn load(&mut self) -> Result<Option<Vec<u8>>, ModePageError>;
    fn save(&mut self, data: &[u8]) -> Result<(), ModePageError>;
}

/// Saved pages kept in a small binary file next to the emulator configuration.
#[derive(Debug, Clone)]
pub struct ModePageFile {
    path: PathBuf,
}

impl ModePageFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ModePagePersistence for ModePageFile {
    fn load(&mut self) -> Result<Option<Vec<u8>>, ModePageError> {
        match fs::read(&self.path) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn save(&mut self, data: &[u8]) -> Result<(), ModePageError> {
        fs::write(&self.path, data)?;
        Ok(())
    }
}
