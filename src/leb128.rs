// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! LEB128 varints plus fixed-width big-endian "raw" values.
//!
//! Raw values are used wherever a field has to be back-patched once its
//! final value is known.

use crate::reader::MltReadError;

const EXT_BIT: u8 = 0x80;
const PAYLOAD_MASK: u8 = 0x7f;

#[derive(Debug, Default)]
pub(crate) struct Leb128Writer {
    buf: Vec<u8>,
}

impl Leb128Writer {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn position(&self) -> usize {
        self.buf.len()
    }

    pub(crate) fn write_byte(&mut self, data: u8) -> &mut Self {
        self.buf.push(data);
        self
    }

    pub(crate) fn write_bytes(&mut self, data: &[u8]) -> &mut Self {
        self.buf.extend_from_slice(data);
        self
    }

    /// Writes the 32-bit pattern of `data` as an unsigned varint.
    pub(crate) fn write_int(&mut self, data: i32) -> &mut Self {
        self.write_varint(u64::from(data as u32))
    }

    fn write_varint(&mut self, mut value: u64) -> &mut Self {
        loop {
            let byte = (value as u8) & PAYLOAD_MASK;
            value >>= 7;
            if value == 0 {
                self.buf.push(byte);
                return self;
            }
            self.buf.push(byte | EXT_BIT);
        }
    }

    /// Writes a varint byte length followed by the UTF-8 bytes.
    pub(crate) fn write_utf(&mut self, data: &str) -> &mut Self {
        self.write_int(data.len() as i32);
        self.write_bytes(data.as_bytes())
    }

    pub(crate) fn write_int_raw(&mut self, data: i32) -> &mut Self {
        self.write_bytes(&data.to_be_bytes())
    }

    pub(crate) fn write_long_raw(&mut self, data: i64) -> &mut Self {
        self.write_bytes(&data.to_be_bytes())
    }

    /// Overwrites 4 already written bytes at `offset`.
    pub(crate) fn patch_int_raw(&mut self, offset: usize, data: i32) {
        self.buf[offset..offset + 4].copy_from_slice(&data.to_be_bytes());
    }

    pub(crate) fn into_inner(self) -> Vec<u8> {
        self.buf
    }
}

/// Reads from a slice that sits at `base` within the whole input, so errors
/// carry absolute offsets.
#[derive(Debug)]
pub(crate) struct Leb128Reader<'a> {
    data: &'a [u8],
    base: usize,
    pos: usize,
}

impl<'a> Leb128Reader<'a> {
    pub(crate) fn new(data: &'a [u8], base: usize) -> Self {
        Leb128Reader { data, base, pos: 0 }
    }

    pub(crate) fn position(&self) -> usize {
        self.pos
    }

    pub(crate) fn absolute_position(&self) -> usize {
        self.base + self.pos
    }

    pub(crate) fn seek(&mut self, pos: usize) {
        self.pos = pos;
    }

    /// Bytes left before the end of the input.
    pub(crate) fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    pub(crate) fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], MltReadError> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.data.len())
            .ok_or(MltReadError::UnexpectedEof {
                offset: self.absolute_position(),
            })?;
        let bytes = &self.data[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    pub(crate) fn read_array<const N: usize>(&mut self) -> Result<[u8; N], MltReadError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_bytes(N)?);
        Ok(out)
    }

    pub(crate) fn read_byte(&mut self) -> Result<u8, MltReadError> {
        Ok(self.read_array::<1>()?[0])
    }

    pub(crate) fn read_int_raw(&mut self) -> Result<i32, MltReadError> {
        Ok(i32::from_be_bytes(self.read_array()?))
    }

    pub(crate) fn read_long_raw(&mut self) -> Result<i64, MltReadError> {
        Ok(i64::from_be_bytes(self.read_array()?))
    }

    pub(crate) fn read_int(&mut self) -> Result<i32, MltReadError> {
        let start = self.absolute_position();
        let value = self.read_varint(5)?;
        u32::try_from(value)
            .map(|v| v as i32)
            .map_err(|_| MltReadError::MalformedVarint { offset: start })
    }

    fn read_varint(&mut self, max_bytes: u32) -> Result<u64, MltReadError> {
        let start = self.absolute_position();
        let mut value = 0u64;
        for i in 0..max_bytes {
            let byte = self.read_byte()?;
            value |= u64::from(byte & PAYLOAD_MASK) << (7 * i);
            if byte & EXT_BIT == 0 {
                return Ok(value);
            }
        }
        Err(MltReadError::MalformedVarint { offset: start })
    }

    pub(crate) fn read_utf(&mut self) -> Result<String, MltReadError> {
        let offset = self.absolute_position();
        let len = self.read_int()?;
        let len = usize::try_from(len).map_err(|_| MltReadError::MalformedVarint { offset })?;
        let bytes = self.read_bytes(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|source| MltReadError::InvalidUtf8 { offset, source })
    }
}
