//! Raw CD sector layout: synthesizing sync/header/EDC/ECC for cooked images and extracting the
//! fields a raw read asks for.

use super::{HeaderCodes, SectorRequest, SubChannel, Track, TrackKind};
use crate::msf::Msf;
use crate::toc;

pub const RAW_SECTOR_LEN: usize = 2352;
pub const SYNC_PATTERN: [u8; 12] = [
    0x00, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0x00,
];

const HEADER: std::ops::Range<usize> = 12..16;
const SUB_HEADER: std::ops::Range<usize> = 16..24;
/// Sub-header submode bit selecting Form 2.
const SUBMODE_FORM2: u8 = 0x20;

const EDC_TABLE: [u32; 256] = {
    let mut table = [0u32; 256];
    let mut i = 0;
    while i < 256 {
        let mut edc = i as u32;
        let mut bit = 0;
        while bit < 8 {
            edc = (edc >> 1) ^ if edc & 1 != 0 { 0xD801_8001 } else { 0 };
            bit += 1;
        }
        table[i] = edc;
        i += 1;
    }
    table
};

const ECC_F: [u8; 256] = {
    let mut table = [0u8; 256];
    let mut i = 0;
    while i < 256 {
        table[i] = ((i << 1) ^ if i & 0x80 != 0 { 0x11D } else { 0 }) as u8;
        i += 1;
    }
    table
};

const ECC_B: [u8; 256] = {
    let mut table = [0u8; 256];
    let mut i = 0;
    while i < 256 {
        table[i ^ ECC_F[i] as usize] = i as u8;
        i += 1;
    }
    table
};

/// CD-ROM error detection code (CRC-32, reflected polynomial 0xD8018001).
pub fn edc(data: &[u8]) -> u32 {
    data.iter().fold(0u32, |edc, &b| {
        (edc >> 8) ^ EDC_TABLE[((edc ^ u32::from(b)) & 0xFF) as usize]
    })
}

fn ecc_block(
    src: &[u8],
    major_count: usize,
    minor_count: usize,
    major_mult: usize,
    minor_inc: usize,
    dest: &mut [u8],
) {
    let size = major_count * minor_count;
    for major in 0..major_count {
        let mut index = (major >> 1) * major_mult + (major & 1);
        let mut ecc_a = 0u8;
        let mut ecc_b = 0u8;
        for _ in 0..minor_count {
            let temp = src[index];
            index += minor_inc;
            if index >= size {
                index -= size;
            }
            ecc_a ^= temp;
            ecc_b ^= temp;
            ecc_a = ECC_F[usize::from(ecc_a)];
        }
        ecc_a = ECC_B[usize::from(ECC_F[usize::from(ecc_a)] ^ ecc_b)];
        dest[major] = ecc_a;
        dest[major + major_count] = ecc_a ^ ecc_b;
    }
}

/// Computes P and Q parity in place. Mode 2 sectors are protected with a zeroed address.
fn generate_ecc(sector: &mut [u8; RAW_SECTOR_LEN], zero_address: bool) {
    let mut header = [0u8; 4];
    header.copy_from_slice(&sector[HEADER]);
    if zero_address {
        sector[HEADER].fill(0);
    }

    let mut p = [0u8; 172];
    ecc_block(&sector[0x0C..], 86, 24, 2, 86, &mut p);
    sector[0x81C..0x8C8].copy_from_slice(&p);

    let mut q = [0u8; 104];
    ecc_block(&sector[0x0C..], 52, 43, 86, 88, &mut q);
    sector[0x8C8..0x930].copy_from_slice(&q);

    sector[HEADER].copy_from_slice(&header);
}

fn write_header(sector: &mut [u8; RAW_SECTOR_LEN], lba: u32, mode: u8) {
    sector[..12].copy_from_slice(&SYNC_PATTERN);
    let msf = Msf::from_lba(lba as i32).to_bcd();
    sector[12..15].copy_from_slice(&msf);
    sector[15] = mode;
}

/// Full Mode 1 sector around 2048 bytes of user data.
pub fn build_mode1(lba: u32, user: &[u8]) -> [u8; RAW_SECTOR_LEN] {
    let mut sector = [0u8; RAW_SECTOR_LEN];
    write_header(&mut sector, lba, 1);
    sector[16..2064].copy_from_slice(&user[..2048]);
    let edc = edc(&sector[..2064]);
    sector[2064..2068].copy_from_slice(&edc.to_le_bytes());
    generate_ecc(&mut sector, false);
    sector
}

/// Full Mode 2 Form 1 sector around 2048 bytes of user data (data sub-header).
pub fn build_mode2_form1(lba: u32, user: &[u8]) -> [u8; RAW_SECTOR_LEN] {
    let mut sector = [0u8; RAW_SECTOR_LEN];
    write_header(&mut sector, lba, 2);
    sector[SUB_HEADER].copy_from_slice(&[0, 0, 0x08, 0, 0, 0, 0x08, 0]);
    sector[24..2072].copy_from_slice(&user[..2048]);
    let edc = edc(&sector[16..2072]);
    sector[2072..2076].copy_from_slice(&edc.to_le_bytes());
    generate_ecc(&mut sector, true);
    sector
}

/// Mode 2 sector from the 2336 bytes following the header (sub-header included).
pub fn build_mode2(lba: u32, body: &[u8]) -> [u8; RAW_SECTOR_LEN] {
    let mut sector = [0u8; RAW_SECTOR_LEN];
    write_header(&mut sector, lba, 2);
    sector[16..].copy_from_slice(&body[..2336]);
    sector
}

/// Concrete layout of one sector, refining a track kind by the sector's own sub-header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectorForm {
    Audio,
    Mode1,
    Mode2Formless,
    Mode2Form1,
    Mode2Form2,
}

impl SectorForm {
    pub fn of(kind: TrackKind, sector: &[u8; RAW_SECTOR_LEN]) -> Self {
        match kind {
            TrackKind::Audio => SectorForm::Audio,
            TrackKind::Mode1 => SectorForm::Mode1,
            TrackKind::Mode2Formless => SectorForm::Mode2Formless,
            TrackKind::Mode2Xa if sector[18] & SUBMODE_FORM2 != 0 => SectorForm::Mode2Form2,
            TrackKind::Mode2Xa => SectorForm::Mode2Form1,
        }
    }

    pub fn matches(self, expected: super::SectorType) -> bool {
        use super::SectorType;
        match expected {
            SectorType::Any => true,
            SectorType::Cdda => self == SectorForm::Audio,
            SectorType::Mode1 => self == SectorForm::Mode1,
            SectorType::Mode2Formless => self == SectorForm::Mode2Formless,
            SectorType::Mode2Form1 => self == SectorForm::Mode2Form1,
            SectorType::Mode2Form2 => self == SectorForm::Mode2Form2,
        }
    }

    fn user_data(self) -> std::ops::Range<usize> {
        match self {
            SectorForm::Audio => 0..RAW_SECTOR_LEN,
            SectorForm::Mode1 => 16..2064,
            SectorForm::Mode2Formless => 16..RAW_SECTOR_LEN,
            SectorForm::Mode2Form1 => 24..2072,
            SectorForm::Mode2Form2 => 24..2348,
        }
    }

    fn edc_ecc(self) -> std::ops::Range<usize> {
        match self {
            SectorForm::Audio | SectorForm::Mode2Formless => 0..0,
            SectorForm::Mode1 => 2064..RAW_SECTOR_LEN,
            SectorForm::Mode2Form1 => 2072..RAW_SECTOR_LEN,
            SectorForm::Mode2Form2 => 2348..RAW_SECTOR_LEN,
        }
    }

    fn has_sub_header(self) -> bool {
        matches!(self, SectorForm::Mode2Form1 | SectorForm::Mode2Form2)
    }
}

/// Copies the requested fields of `sector` into `out` and returns the byte count.
pub fn extract(
    sector: &[u8; RAW_SECTOR_LEN],
    form: SectorForm,
    request: &SectorRequest,
    track: Option<&Track>,
    lba: u32,
    out: &mut [u8],
) -> usize {
    let mut n = 0;
    let mut push = |bytes: &[u8]| {
        out[n..n + bytes.len()].copy_from_slice(bytes);
        n += bytes.len();
    };

    if form == SectorForm::Audio {
        if request.user_data {
            push(&sector[..]);
        }
    } else {
        if request.sync {
            push(&sector[..12]);
        }
        if matches!(request.header, HeaderCodes::Header | HeaderCodes::All) {
            push(&sector[HEADER]);
        }
        if form.has_sub_header() && matches!(request.header, HeaderCodes::SubHeader | HeaderCodes::All)
        {
            push(&sector[SUB_HEADER]);
        }
        if request.user_data {
            push(&sector[form.user_data()]);
        }
        if request.edc_ecc {
            push(&sector[form.edc_ecc()]);
        }
    }

    let zeros = [0u8; 296];
    push(&zeros[..request.error_field.len()]);

    let tracks = track.map(std::slice::from_ref).unwrap_or(&[]);
    match request.subchannel {
        SubChannel::None => {}
        SubChannel::RawPw => push(&toc::raw_pw(&toc::q_subchannel(tracks, lba))),
        SubChannel::Q => {
            let mut q = [0u8; 16];
            q[..12].copy_from_slice(&toc::q_subchannel(tracks, lba));
            push(&q);
        }
        SubChannel::Rw => push(&[0u8; 96]),
    }
    n
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::medium::{ErrorField, SectorType};

    #[test]
    fn mode1_layout() {
        let user = [0xA5u8; 2048];
        let sector = build_mode1(16, &user);
        assert_eq!(&sector[..12], &SYNC_PATTERN);
        assert_eq!(&sector[12..16], &[0x00, 0x02, 0x16, 0x01]);
        assert_eq!(&sector[16..2064], &user[..]);
        assert_eq!(
            u32::from_le_bytes(sector[2064..2068].try_into().unwrap()),
            edc(&sector[..2064])
        );
        assert!(sector[0x81C..0x930].iter().any(|&b| b != 0));
    }

    #[test]
    fn mode2_parity_excludes_the_address() {
        let mut sector = [0u8; RAW_SECTOR_LEN];
        write_header(&mut sector, 1234, 2);
        let mut with_address = sector;

        generate_ecc(&mut sector, true);
        assert!(sector[0x81C..0x930].iter().all(|&b| b == 0));
        assert_eq!(sector[15], 2, "header is restored after parity generation");

        generate_ecc(&mut with_address, false);
        assert!(with_address[0x81C..0x930].iter().any(|&b| b != 0));
    }

    #[test]
    fn extract_header_and_user_data() {
        let sector = build_mode1(0, &[0x11u8; 2048]);
        let request = SectorRequest {
            header: HeaderCodes::Header,
            error_field: ErrorField::C2,
            ..SectorRequest::user_data()
        };
        let mut out = [0u8; 4096];
        let n = extract(&sector, SectorForm::Mode1, &request, None, 0, &mut out);
        assert_eq!(n, 4 + 2048 + 294);
        assert_eq!(&out[..4], &sector[12..16]);
        assert_eq!(out[4], 0x11);
    }

    #[test]
    fn xa_form_comes_from_sub_header() {
        let mut sector = build_mode2_form1(0, &[0u8; 2048]);
        assert_eq!(SectorForm::of(TrackKind::Mode2Xa, &sector), SectorForm::Mode2Form1);
        sector[18] |= SUBMODE_FORM2;
        let form = SectorForm::of(TrackKind::Mode2Xa, &sector);
        assert_eq!(form, SectorForm::Mode2Form2);
        assert!(form.matches(SectorType::Mode2Form2));
        assert!(!form.matches(SectorType::Mode1));
    }
}
