// Copyright (c) 2017 Anatoly Ikorsky
//
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. All files in the project carrying such notice may not be copied,
// modified, or distributed except according to those terms.

use std::io;

/// Fatal framing errors. Any of these must force-close the connection.
#[derive(Debug, thiserror::Error)]
pub enum PacketCodecError {
    #[error("IO error: `{0}'")]
    Io(#[from] io::Error),

    #[error("Packet is larger than max_allowed_packet")]
    PacketTooLarge,

    #[error("Packets out of sync")]
    PacketsOutOfSync,

    #[error("Bad compressed packet header")]
    BadCompressedPacketHeader,

    #[error("Compression error: `{0}'")]
    Compression(io::Error),
}
