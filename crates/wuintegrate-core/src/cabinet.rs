//! Single-pass cabinet reader.
//!
//! A cabinet folder is one compressed stream holding its files back to back.
//! [`Cabinet::extract`] decodes each folder it needs exactly once, front to
//! back, and hands every selected file its bytes as the stream passes them.

use std::collections::BTreeMap;
use std::io::{self, Read, Seek, SeekFrom};

use flate2::{Decompress, FlushDecompress};
use lzxd::{Lzxd, WindowSize};

const SIGNATURE: &[u8; 4] = b"MSCF";
const FLAG_PREV_CABINET: u16 = 0x0001;
const FLAG_NEXT_CABINET: u16 = 0x0002;
const FLAG_RESERVE_PRESENT: u16 = 0x0004;
const ATTR_NAME_IS_UTF: u16 = 0x0080;
const MAX_NAME_LEN: usize = 256;

const MSZIP_SIGNATURE: &[u8; 2] = b"CK";
const MSZIP_WINDOW: usize = 0x8000;

fn invalid(message: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, message.into())
}

#[derive(Debug)]
pub enum ExtractError<E> {
    /// The cabinet itself is truncated or corrupt.
    Cabinet(io::Error),
    /// The sink rejected a chunk.
    Sink(E),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CabinetEntry {
    pub name: String,
    pub size: u32,
    folder: u16,
    offset: u32,
}

impl CabinetEntry {
    fn start(&self) -> usize {
        self.offset as usize
    }

    fn end(&self) -> usize {
        self.start() + self.size as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Compression {
    Stored,
    MsZip,
    Lzx(WindowSize),
}

impl Compression {
    fn from_bits(bits: u16) -> io::Result<Self> {
        match bits & 0x000F {
            0 => Ok(Self::Stored),
            1 => Ok(Self::MsZip),
            2 => Err(invalid("Quantum-compressed folders are not supported")),
            3 => {
                let window = match (bits >> 8) & 0x001F {
                    15 => WindowSize::KB32,
                    16 => WindowSize::KB64,
                    17 => WindowSize::KB128,
                    18 => WindowSize::KB256,
                    19 => WindowSize::KB512,
                    20 => WindowSize::MB1,
                    21 => WindowSize::MB2,
                    22 => WindowSize::MB4,
                    23 => WindowSize::MB8,
                    24 => WindowSize::MB16,
                    25 => WindowSize::MB32,
                    other => return Err(invalid(format!("invalid LZX window exponent {other}"))),
                };
                Ok(Self::Lzx(window))
            }
            other => Err(invalid(format!("unknown compression type {other}"))),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Folder {
    first_block: u32,
    blocks: u16,
    compression: Compression,
}

/// Per-folder decoder state. MSZIP and LZX blocks both refer back into
/// earlier blocks of the same folder.
enum Decoder {
    Stored,
    MsZip {
        inflater: Decompress,
        window: Vec<u8>,
    },
    Lzx(Box<Lzxd>),
}

impl Decoder {
    fn new(compression: Compression) -> Self {
        match compression {
            Compression::Stored => Self::Stored,
            Compression::MsZip => Self::MsZip {
                inflater: Decompress::new(false),
                window: Vec::with_capacity(MSZIP_WINDOW),
            },
            Compression::Lzx(window) => Self::Lzx(Box::new(Lzxd::new(window))),
        }
    }

    fn decode(&mut self, data: Vec<u8>, size: usize) -> io::Result<Vec<u8>> {
        match self {
            Self::Stored if data.len() == size => Ok(data),
            Self::Stored => Err(invalid(format!(
                "stored block holds {} bytes, header says {size}",
                data.len()
            ))),
            Self::MsZip { inflater, window } => inflate_block(inflater, window, &data, size),
            Self::Lzx(decoder) => decoder
                .decompress_next(&data, size)
                .map(<[u8]>::to_vec)
                .map_err(|error| invalid(format!("LZX decompression failed: {error}"))),
        }
    }
}

/// Inflate one MSZIP block. Each block is a complete deflate stream that may
/// reference the previous 32 KiB of output, so that history is replayed as a
/// stored deflate block before the real data.
fn inflate_block(
    inflater: &mut Decompress,
    window: &mut Vec<u8>,
    data: &[u8],
    size: usize,
) -> io::Result<Vec<u8>> {
    let deflated = data
        .strip_prefix(MSZIP_SIGNATURE.as_slice())
        .ok_or_else(|| invalid("MSZIP block is missing its CK signature"))?;

    inflater.reset(false);
    if !window.is_empty() {
        let len = u16::try_from(window.len())
            .map_err(|_| invalid("MSZIP history exceeds the deflate window"))?;
        let mut history = Vec::with_capacity(window.len() + 5);
        history.push(0);
        history.extend_from_slice(&len.to_le_bytes());
        history.extend_from_slice(&(!len).to_le_bytes());
        history.extend_from_slice(window);
        let mut replayed = Vec::with_capacity(window.len());
        inflater
            .decompress_vec(&history, &mut replayed, FlushDecompress::Sync)
            .map_err(|error| invalid(format!("MSZIP history replay failed: {error}")))?;
    }

    let mut out = Vec::with_capacity(size);
    inflater
        .decompress_vec(deflated, &mut out, FlushDecompress::Finish)
        .map_err(|error| invalid(format!("MSZIP decompression failed: {error}")))?;
    if out.len() != size {
        return Err(invalid(format!(
            "MSZIP block inflated to {} bytes, header says {size}",
            out.len()
        )));
    }

    if out.len() >= MSZIP_WINDOW {
        window.clear();
        window.extend_from_slice(&out[out.len() - MSZIP_WINDOW..]);
    } else {
        let total = window.len() + out.len();
        if total > MSZIP_WINDOW {
            window.drain(..total - MSZIP_WINDOW);
        }
        window.extend_from_slice(&out);
    }
    Ok(out)
}

/// CFDATA checksum: little-endian words XORed together, with a short tail
/// folded in big-endian, then the block's two size fields.
fn block_checksum(parts: &[&[u8]], compressed_size: u16, uncompressed_size: u16) -> u32 {
    let mut value = 0u32;
    let mut word = 0u32;
    let mut shift = 0u32;
    for &byte in parts.iter().flat_map(|part| part.iter()) {
        word |= u32::from(byte) << shift;
        if shift == 24 {
            value ^= word;
            word = 0;
            shift = 0;
        } else {
            shift += 8;
        }
    }
    let tail = match shift {
        8 => word,
        16 => (word >> 8) | ((word & 0xff) << 8),
        24 => (word >> 16) | (word & 0xff00) | ((word & 0xff) << 16),
        _ => 0,
    };
    value ^ tail ^ (u32::from(compressed_size) | (u32::from(uncompressed_size) << 16))
}

fn read_u8<R: Read>(reader: &mut R) -> io::Result<u8> {
    let mut buf = [0u8; 1];
    reader.read_exact(&mut buf)?;
    Ok(buf[0])
}

fn read_u16<R: Read>(reader: &mut R) -> io::Result<u16> {
    let mut buf = [0u8; 2];
    reader.read_exact(&mut buf)?;
    Ok(u16::from_le_bytes(buf))
}

fn read_u32<R: Read>(reader: &mut R) -> io::Result<u32> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

fn skip<R: Read>(reader: &mut R, len: u64) -> io::Result<()> {
    let skipped = io::copy(&mut reader.by_ref().take(len), &mut io::sink())?;
    if skipped < len {
        return Err(io::ErrorKind::UnexpectedEof.into());
    }
    Ok(())
}

fn read_name<R: Read>(reader: &mut R) -> io::Result<Vec<u8>> {
    let mut name = Vec::new();
    loop {
        match read_u8(reader)? {
            0 => return Ok(name),
            _ if name.len() >= MAX_NAME_LEN => {
                return Err(invalid("cabinet name is not terminated"));
            }
            byte => name.push(byte),
        }
    }
}

fn read_folder<R: Read>(reader: &mut R, reserve: u8) -> io::Result<Folder> {
    let first_block = read_u32(reader)?;
    let blocks = read_u16(reader)?;
    let compression = Compression::from_bits(read_u16(reader)?)?;
    skip(reader, u64::from(reserve))?;
    Ok(Folder {
        first_block,
        blocks,
        compression,
    })
}

fn read_entry<R: Read>(reader: &mut R) -> io::Result<CabinetEntry> {
    let size = read_u32(reader)?;
    let offset = read_u32(reader)?;
    let folder = read_u16(reader)?;
    // date and time
    skip(reader, 4)?;
    let attributes = read_u16(reader)?;
    let raw = read_name(reader)?;
    let name = if attributes & ATTR_NAME_IS_UTF == 0 {
        raw.iter().copied().map(char::from).collect()
    } else {
        String::from_utf8(raw).map_err(|_| invalid("cabinet entry name is not UTF-8"))?
    };
    Ok(CabinetEntry {
        name,
        size,
        folder,
        offset,
    })
}

pub struct Cabinet<R> {
    reader: R,
    data_reserve: u8,
    folders: Vec<Folder>,
    entries: Vec<CabinetEntry>,
}

impl<R: Read + Seek> Cabinet<R> {
    /// Read the cabinet header and its folder and file tables.
    ///
    /// # Errors
    /// Returns `InvalidData` or `UnexpectedEof` for anything that is not a
    /// complete single cabinet.
    pub fn new(mut reader: R) -> io::Result<Self> {
        let mut signature = [0u8; 4];
        reader.read_exact(&mut signature)?;
        if &signature != SIGNATURE {
            return Err(invalid("missing MSCF signature"));
        }
        // reserved1, total size, reserved2
        skip(&mut reader, 12)?;
        let files_offset = read_u32(&mut reader)?;
        // reserved3, version
        skip(&mut reader, 6)?;
        let folder_count = read_u16(&mut reader)?;
        let entry_count = read_u16(&mut reader)?;
        let flags = read_u16(&mut reader)?;
        // set id and index
        skip(&mut reader, 4)?;

        let (folder_reserve, data_reserve) = if flags & FLAG_RESERVE_PRESENT == 0 {
            (0, 0)
        } else {
            let header_reserve = read_u16(&mut reader)?;
            let folder_reserve = read_u8(&mut reader)?;
            let data_reserve = read_u8(&mut reader)?;
            skip(&mut reader, u64::from(header_reserve))?;
            (folder_reserve, data_reserve)
        };
        for flag in [FLAG_PREV_CABINET, FLAG_NEXT_CABINET] {
            if flags & flag != 0 {
                // cabinet and disk names
                read_name(&mut reader)?;
                read_name(&mut reader)?;
            }
        }

        let folders = (0..folder_count)
            .map(|_| read_folder(&mut reader, folder_reserve))
            .collect::<io::Result<Vec<_>>>()?;
        reader.seek(SeekFrom::Start(u64::from(files_offset)))?;
        let entries = (0..entry_count)
            .map(|_| read_entry(&mut reader))
            .collect::<io::Result<Vec<_>>>()?;
        if let Some(entry) = entries
            .iter()
            .find(|entry| usize::from(entry.folder) >= folders.len())
        {
            return Err(invalid(format!(
                "{} continues into another cabinet",
                entry.name
            )));
        }

        Ok(Self {
            reader,
            data_reserve,
            folders,
            entries,
        })
    }

    pub fn entries(&self) -> &[CabinetEntry] {
        &self.entries
    }

    /// Stream the entries at `selected` (indices into [`Self::entries`]) to
    /// `sink` as `(index, bytes, last)` chunks, decoding each folder that holds
    /// one of them once. Every selected entry ends with exactly one `last`
    /// chunk; an empty entry gets only that. Returns the number of data
    /// blocks decoded.
    ///
    /// # Errors
    /// Returns [`ExtractError::Cabinet`] for corrupt or truncated data and
    /// [`ExtractError::Sink`] for the first error `sink` returns.
    pub fn extract<E, F>(
        &mut self,
        selected: &[usize],
        mut sink: F,
    ) -> Result<usize, ExtractError<E>>
    where
        F: FnMut(usize, &[u8], bool) -> Result<(), E>,
    {
        let mut by_folder: BTreeMap<u16, Vec<usize>> = BTreeMap::new();
        for &index in selected {
            let entry = self.entries.get(index).ok_or_else(|| {
                ExtractError::Cabinet(invalid(format!("no cabinet entry {index}")))
            })?;
            if entry.size == 0 {
                sink(index, &[], true).map_err(ExtractError::Sink)?;
            } else {
                by_folder.entry(entry.folder).or_default().push(index);
            }
        }

        let mut decoded = 0;
        for (folder, mut indices) in by_folder {
            indices.sort_by_key(|&index| (self.entries[index].offset, index));
            indices.dedup();
            decoded += self.stream_folder(usize::from(folder), &indices, &mut sink)?;
        }
        Ok(decoded)
    }

    fn stream_folder<E, F>(
        &mut self,
        folder: usize,
        indices: &[usize],
        sink: &mut F,
    ) -> Result<usize, ExtractError<E>>
    where
        F: FnMut(usize, &[u8], bool) -> Result<(), E>,
    {
        let Folder {
            first_block,
            blocks,
            compression,
        } = self.folders[folder];
        let mut decoder = Decoder::new(compression);
        self.reader
            .seek(SeekFrom::Start(u64::from(first_block)))
            .map_err(ExtractError::Cabinet)?;

        let mut pending = indices;
        let mut block_start = 0usize;
        let mut decoded = 0;
        while !pending.is_empty() && decoded < usize::from(blocks) {
            let data = self.read_block(&mut decoder).map_err(ExtractError::Cabinet)?;
            decoded += 1;
            let block_end = block_start + data.len();

            for &index in pending {
                let entry = &self.entries[index];
                if entry.start() >= block_end {
                    break;
                }
                let from = entry.start().max(block_start);
                let to = entry.end().min(block_end);
                if from < to {
                    let last = entry.end() <= block_end;
                    sink(index, &data[from - block_start..to - block_start], last)
                        .map_err(ExtractError::Sink)?;
                }
            }
            while let Some((&index, rest)) = pending.split_first() {
                if self.entries[index].end() > block_end {
                    break;
                }
                pending = rest;
            }
            block_start = block_end;
        }

        if let Some(&index) = pending.first() {
            return Err(ExtractError::Cabinet(invalid(format!(
                "folder {folder} ends before {} is complete",
                self.entries[index].name
            ))));
        }
        Ok(decoded)
    }

    fn read_block(&mut self, decoder: &mut Decoder) -> io::Result<Vec<u8>> {
        let checksum = read_u32(&mut self.reader)?;
        let compressed_size = read_u16(&mut self.reader)?;
        let uncompressed_size = read_u16(&mut self.reader)?;
        let mut reserve = vec![0u8; usize::from(self.data_reserve)];
        self.reader.read_exact(&mut reserve)?;
        let mut data = vec![0u8; usize::from(compressed_size)];
        self.reader.read_exact(&mut data)?;

        if checksum != 0 {
            let actual = block_checksum(
                &[reserve.as_slice(), data.as_slice()],
                compressed_size,
                uncompressed_size,
            );
            if actual != checksum {
                return Err(invalid(format!(
                    "data block checksum mismatch (expected {checksum:08x}, got {actual:08x})"
                )));
            }
        }
        decoder.decode(data, usize::from(uncompressed_size))
    }
}
