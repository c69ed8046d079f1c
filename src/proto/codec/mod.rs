// Copyright (c) 2017 Anatoly Ikorsky
//
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. All files in the project carrying such notice may not be copied,
// modified, or distributed except according to those terms.

//! Envelope layer of the MySql protocol.
//!
//! Every payload travels in envelopes of `(u24-le length, u8 sequence id,
//! data)`. A payload of `2^24 - 1` bytes or longer is split into multiple
//! envelopes, terminated by an envelope shorter than the maximum (possibly
//! zero-length). When compression is negotiated an outer envelope of
//! `(u24-le compressed length, u8 compressed sequence id, u24-le plain
//! length)` wraps the inner envelope stream.

use byteorder::{ByteOrder, LittleEndian as LE};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use std::io::{Read, Write};

use crate::constants::{DEFAULT_MAX_ALLOWED_PACKET, MAX_PAYLOAD_LEN, MIN_COMPRESS_LENGTH};

pub mod error;

use self::error::PacketCodecError;

const HEADER_LEN: usize = 4;
const COMP_HEADER_LEN: usize = 7;

/// Compression algorithm of the outer envelope layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    Zlib,
    /// Level is within `1..=22`.
    Zstd { level: i32 },
}

impl Compression {
    fn compress(self, data: &[u8]) -> std::io::Result<Vec<u8>> {
        match self {
            Compression::Zlib => {
                let mut encoder = flate2::write::ZlibEncoder::new(
                    Vec::with_capacity(data.len() / 2),
                    flate2::Compression::default(),
                );
                encoder.write_all(data)?;
                encoder.finish()
            }
            Compression::Zstd { level } => zstd::bulk::compress(data, level),
        }
    }

    fn decompress(self, data: &[u8], plain_len: usize) -> std::io::Result<Vec<u8>> {
        match self {
            Compression::Zlib => {
                let mut output = Vec::with_capacity(plain_len);
                flate2::read::ZlibDecoder::new(data).read_to_end(&mut output)?;
                Ok(output)
            }
            Compression::Zstd { .. } => zstd::bulk::decompress(data, plain_len),
        }
    }
}

/// Inner envelope layer: sequence tracking and multi-envelope assembly.
#[derive(Debug)]
struct ChunkCodec {
    seq_id: u8,
    /// Accumulator for payloads that span multiple envelopes.
    buffer: BytesMut,
    /// Set when the previously decoded envelope was exactly `MAX_PAYLOAD_LEN`
    /// bytes, i.e. a continuation envelope must follow.
    must_continue: bool,
}

impl ChunkCodec {
    fn new() -> Self {
        Self {
            seq_id: 0,
            buffer: BytesMut::new(),
            must_continue: false,
        }
    }

    fn reset_seq_id(&mut self) {
        self.seq_id = 0;
    }

    fn decode(
        &mut self,
        src: &mut BytesMut,
        max_allowed_packet: usize,
    ) -> Result<Option<Bytes>, PacketCodecError> {
        loop {
            if src.len() < HEADER_LEN {
                return Ok(None);
            }

            let chunk_len = LE::read_u24(&src[..3]) as usize;
            let seq_id = src[3];

            if src.len() < HEADER_LEN + chunk_len {
                src.reserve(HEADER_LEN + chunk_len - src.len());
                return Ok(None);
            }

            if seq_id != self.seq_id {
                return Err(PacketCodecError::PacketsOutOfSync);
            }
            self.seq_id = self.seq_id.wrapping_add(1);

            src.advance(HEADER_LEN);
            let chunk = src.split_to(chunk_len);

            if self.buffer.len() + chunk.len() > max_allowed_packet.max(MAX_PAYLOAD_LEN) {
                return Err(PacketCodecError::PacketTooLarge);
            }

            if !self.must_continue && chunk_len < MAX_PAYLOAD_LEN {
                // Fast path: payload fits a single envelope.
                return Ok(Some(chunk.freeze()));
            }

            self.buffer.unsplit(chunk);
            self.must_continue = chunk_len == MAX_PAYLOAD_LEN;

            if !self.must_continue {
                return Ok(Some(self.buffer.split().freeze()));
            }
        }
    }

    fn encode(
        &mut self,
        payload: &[u8],
        max_allowed_packet: usize,
        dst: &mut BytesMut,
    ) -> Result<(), PacketCodecError> {
        if payload.len() > max_allowed_packet.max(MAX_PAYLOAD_LEN) {
            return Err(PacketCodecError::PacketTooLarge);
        }

        dst.reserve(payload.len() + (payload.len() / MAX_PAYLOAD_LEN + 1) * HEADER_LEN);

        for chunk in payload.chunks(MAX_PAYLOAD_LEN) {
            let mut header = [0_u8; HEADER_LEN];
            LE::write_u24(&mut header[..3], chunk.len() as u32);
            header[3] = self.seq_id;
            self.seq_id = self.seq_id.wrapping_add(1);
            dst.put_slice(&header);
            dst.put_slice(chunk);
        }

        // A payload that is an exact multiple of the maximum (including the
        // empty payload) is terminated by a zero-length envelope.
        if payload.len() % MAX_PAYLOAD_LEN == 0 {
            let mut header = [0_u8; HEADER_LEN];
            header[3] = self.seq_id;
            self.seq_id = self.seq_id.wrapping_add(1);
            dst.put_slice(&header);
        }

        Ok(())
    }
}

/// Outer envelope layer used once compression is negotiated.
#[derive(Debug)]
struct CompLayer {
    algorithm: Compression,
    comp_seq_id: u8,
    /// Decompressed inner envelope stream, consumed by the inner codec.
    plain_in: BytesMut,
}

impl CompLayer {
    fn new(algorithm: Compression) -> Self {
        Self {
            algorithm,
            comp_seq_id: 0,
            plain_in: BytesMut::new(),
        }
    }

    /// Feeds one outer envelope from `src` into `plain_in`.
    ///
    /// Returns `false` if more bytes are needed.
    fn feed(&mut self, src: &mut BytesMut) -> Result<bool, PacketCodecError> {
        if src.len() < COMP_HEADER_LEN {
            return Ok(false);
        }

        let comp_len = LE::read_u24(&src[..3]) as usize;
        let comp_seq_id = src[3];
        let plain_len = LE::read_u24(&src[4..7]) as usize;

        if src.len() < COMP_HEADER_LEN + comp_len {
            src.reserve(COMP_HEADER_LEN + comp_len - src.len());
            return Ok(false);
        }

        if comp_seq_id != self.comp_seq_id {
            return Err(PacketCodecError::PacketsOutOfSync);
        }
        self.comp_seq_id = self.comp_seq_id.wrapping_add(1);

        src.advance(COMP_HEADER_LEN);
        let data = src.split_to(comp_len);

        if plain_len == 0 {
            // Stored without compression.
            self.plain_in.unsplit(data);
        } else {
            let plain = self
                .algorithm
                .decompress(&data, plain_len)
                .map_err(PacketCodecError::Compression)?;
            if plain.len() != plain_len {
                return Err(PacketCodecError::BadCompressedPacketHeader);
            }
            self.plain_in.extend_from_slice(&plain);
        }

        Ok(true)
    }

    /// Wraps the inner envelope stream in `plain_out` into outer envelopes.
    fn wrap(&mut self, plain_out: &[u8], dst: &mut BytesMut) -> Result<(), PacketCodecError> {
        for chunk in plain_out.chunks(MAX_PAYLOAD_LEN) {
            let (data, plain_len) = if chunk.len() < MIN_COMPRESS_LENGTH {
                (chunk.to_vec(), 0)
            } else {
                let compressed = self
                    .algorithm
                    .compress(chunk)
                    .map_err(PacketCodecError::Compression)?;
                if compressed.len() < chunk.len() {
                    (compressed, chunk.len())
                } else {
                    (chunk.to_vec(), 0)
                }
            };

            let mut header = [0_u8; COMP_HEADER_LEN];
            LE::write_u24(&mut header[..3], data.len() as u32);
            header[3] = self.comp_seq_id;
            LE::write_u24(&mut header[4..7], plain_len as u32);
            self.comp_seq_id = self.comp_seq_id.wrapping_add(1);

            dst.reserve(COMP_HEADER_LEN + data.len());
            dst.put_slice(&header);
            dst.put_slice(&data);
        }

        Ok(())
    }
}

/// Codec for MySql protocol envelopes.
///
/// Implements [`tokio_util::codec::Decoder`] and [`Encoder`], so it can drive
/// a [`tokio_util::codec::Framed`] transport. Decoded items are fully
/// assembled payloads.
#[derive(Debug)]
pub struct PacketCodec {
    /// Limit on the total length of an assembled payload.
    pub max_allowed_packet: usize,
    chunk: ChunkCodec,
    comp: Option<CompLayer>,
}

impl Default for PacketCodec {
    fn default() -> Self {
        Self {
            max_allowed_packet: DEFAULT_MAX_ALLOWED_PACKET,
            chunk: ChunkCodec::new(),
            comp: None,
        }
    }
}

impl PacketCodec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resets the sequence counters. Must be called on the events that reset
    /// the envelope sequence: post-login, compression upgrade, start of an
    /// independent exchange.
    pub fn reset_seq_id(&mut self) {
        self.chunk.reset_seq_id();
        if let Some(ref mut comp) = self.comp {
            comp.comp_seq_id = 0;
        }
    }

    /// Inserts the compression layer. Resets sequence counters.
    pub fn compress(&mut self, algorithm: Compression) {
        self.comp = Some(CompLayer::new(algorithm));
        self.reset_seq_id();
    }

    /// Whether the compression layer is active.
    pub fn is_compressed(&self) -> bool {
        self.comp.is_some()
    }

    fn decode_packet(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>, PacketCodecError> {
        match self.comp {
            None => self.chunk.decode(src, self.max_allowed_packet),
            Some(ref mut comp) => loop {
                if let Some(payload) = self
                    .chunk
                    .decode(&mut comp.plain_in, self.max_allowed_packet)?
                {
                    return Ok(Some(payload));
                }
                if !comp.feed(src)? {
                    return Ok(None);
                }
            },
        }
    }

    fn encode_packet(
        &mut self,
        payload: &[u8],
        dst: &mut BytesMut,
    ) -> Result<(), PacketCodecError> {
        match self.comp {
            None => self.chunk.encode(payload, self.max_allowed_packet, dst),
            Some(ref mut comp) => {
                let mut plain_out = BytesMut::new();
                self.chunk
                    .encode(payload, self.max_allowed_packet, &mut plain_out)?;
                comp.wrap(&plain_out, dst)
            }
        }
    }
}

impl Decoder for PacketCodec {
    type Item = Bytes;
    type Error = PacketCodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>, PacketCodecError> {
        self.decode_packet(src)
    }
}

impl Encoder<Bytes> for PacketCodec {
    type Error = PacketCodecError;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<(), PacketCodecError> {
        self.encode_packet(&item, dst)
    }
}

impl Encoder<Vec<u8>> for PacketCodec {
    type Error = PacketCodecError;

    fn encode(&mut self, item: Vec<u8>, dst: &mut BytesMut) -> Result<(), PacketCodecError> {
        self.encode_packet(&item, dst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode_one(codec: &mut PacketCodec, payload: &[u8]) -> BytesMut {
        let mut dst = BytesMut::new();
        codec.encode_packet(payload, &mut dst).unwrap();
        dst
    }

    fn decode_all(codec: &mut PacketCodec, mut wire: BytesMut) -> Vec<Bytes> {
        let mut out = Vec::new();
        while let Some(payload) = codec.decode_packet(&mut wire).unwrap() {
            out.push(payload);
        }
        assert!(wire.is_empty(), "bytes remaining on stream");
        out
    }

    #[test]
    fn should_round_trip_packets() {
        let payloads: Vec<Vec<u8>> = vec![
            vec![],
            vec![0x42],
            vec![0x5a; 313],
            vec![0x5a; MAX_PAYLOAD_LEN - 1],
            vec![0x5a; MAX_PAYLOAD_LEN],
            vec![0x5a; MAX_PAYLOAD_LEN + 1],
        ];

        let mut encoder = PacketCodec::default();
        encoder.max_allowed_packet = MAX_PAYLOAD_LEN * 2;
        let mut decoder = PacketCodec::default();
        decoder.max_allowed_packet = MAX_PAYLOAD_LEN * 2;

        let mut wire = BytesMut::new();
        for payload in &payloads {
            encoder.encode_packet(payload, &mut wire).unwrap();
        }

        let decoded = decode_all(&mut decoder, wire);
        assert_eq!(decoded.len(), payloads.len());
        for (got, expected) in decoded.iter().zip(&payloads) {
            assert_eq!(&got[..], &expected[..]);
        }
    }

    #[test]
    fn should_round_trip_with_arbitrary_chunking() {
        let payload = vec![0x77_u8; MAX_PAYLOAD_LEN + 100];

        let mut encoder = PacketCodec::default();
        encoder.max_allowed_packet = MAX_PAYLOAD_LEN * 2;
        let wire = encode_one(&mut encoder, &payload);

        // Feed the wire bytes in uneven pieces.
        let mut decoder = PacketCodec::default();
        decoder.max_allowed_packet = MAX_PAYLOAD_LEN * 2;
        let mut src = BytesMut::new();
        let mut out = Vec::new();
        for piece in wire.chunks(4096 + 13) {
            src.extend_from_slice(piece);
            while let Some(payload) = decoder.decode_packet(&mut src).unwrap() {
                out.push(payload);
            }
        }

        assert_eq!(out.len(), 1);
        assert_eq!(&out[0][..], &payload[..]);
    }

    #[test]
    fn envelope_count_should_match_formula() {
        for &len in &[
            0_usize,
            1,
            MAX_PAYLOAD_LEN - 1,
            MAX_PAYLOAD_LEN,
            MAX_PAYLOAD_LEN + 1,
            MAX_PAYLOAD_LEN * 2,
        ] {
            let payload = vec![0_u8; len];
            let mut codec = PacketCodec::default();
            codec.max_allowed_packet = MAX_PAYLOAD_LEN * 2;
            let wire = encode_one(&mut codec, &payload);

            let mut envelopes = 0;
            let mut offset = 0;
            while offset < wire.len() {
                let chunk_len = LE::read_u24(&wire[offset..offset + 3]) as usize;
                envelopes += 1;
                offset += HEADER_LEN + chunk_len;
            }

            // ceil(len / MAX) + [len % MAX == 0]
            let ceil = (len + MAX_PAYLOAD_LEN - 1) / MAX_PAYLOAD_LEN;
            let formula = ceil + usize::from(len % MAX_PAYLOAD_LEN == 0);
            assert_eq!(envelopes, formula, "len={}", len);
        }
    }

    #[test]
    fn sequence_ids_should_advance_across_packets() {
        let mut codec = PacketCodec::default();
        let wire = {
            let mut dst = BytesMut::new();
            codec.encode_packet(b"one", &mut dst).unwrap();
            codec.encode_packet(b"two", &mut dst).unwrap();
            dst
        };
        assert_eq!(wire[3], 0);
        let second_header = 4 + 3;
        assert_eq!(wire[second_header + 3], 1);
    }

    #[test]
    fn out_of_sync_should_be_fatal() {
        let mut encoder = PacketCodec::default();
        let mut wire = encode_one(&mut encoder, b"payload");
        wire[3] = 5; // corrupt the sequence id

        let mut decoder = PacketCodec::default();
        match decoder.decode_packet(&mut wire) {
            Err(PacketCodecError::PacketsOutOfSync) => (),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn seq_id_should_reset() {
        let mut codec = PacketCodec::default();
        let _ = encode_one(&mut codec, b"first");
        codec.reset_seq_id();
        let wire = encode_one(&mut codec, b"second");
        assert_eq!(wire[3], 0);
    }

    #[test]
    fn should_round_trip_compressed() {
        for algorithm in [Compression::Zlib, Compression::Zstd { level: 3 }] {
            let payloads: Vec<Vec<u8>> = vec![
                vec![3; 20],      // below MIN_COMPRESS_LENGTH, stored raw
                vec![7; 100_000], // compressible
            ];

            let mut encoder = PacketCodec::default();
            encoder.compress(algorithm);
            let mut decoder = PacketCodec::default();
            decoder.compress(algorithm);

            let mut wire = BytesMut::new();
            for payload in &payloads {
                encoder.encode_packet(payload, &mut wire).unwrap();
            }

            // A compressible run must actually shrink on the wire.
            assert!(wire.len() < 100_020 + 2 * COMP_HEADER_LEN + 2 * HEADER_LEN);

            let decoded = decode_all(&mut decoder, wire);
            assert_eq!(decoded.len(), payloads.len());
            for (got, expected) in decoded.iter().zip(&payloads) {
                assert_eq!(&got[..], &expected[..]);
            }
        }
    }

    #[test]
    fn oversized_payload_should_be_rejected() {
        let mut codec = PacketCodec::default();
        codec.max_allowed_packet = MAX_PAYLOAD_LEN;
        let payload = vec![0_u8; MAX_PAYLOAD_LEN + 1];
        let mut dst = BytesMut::new();
        match codec.encode_packet(&payload, &mut dst) {
            Err(PacketCodecError::PacketTooLarge) => (),
            other => panic!("unexpected result: {:?}", other),
        }
    }
}
