use bytes::{BufMut, Bytes, BytesMut};
use serde::Deserialize;

use super::frame::DisplayFrame;
use crate::protocol_constants::{OPAQUE_BLACK, PPM_MAGIC, PPM_MAX_VALUE};

/// Placement and blending options appended to every frame.
///
/// `ft-server` reads an optional footer after the pixel data giving the
/// frame's offset on the canvas and the layer it is drawn on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct WireOptions {
    /// Horizontal offset on the display canvas.
    pub offset_x: i32,
    /// Vertical offset on the display canvas.
    pub offset_y: i32,
    /// Layer index (0 is the background layer).
    pub layer: u8,
    /// Send pure black as-is so lower layers show through.
    pub transparent: bool,
}

fn header(width: u32, height: u32) -> String {
    format!("{PPM_MAGIC}\n{width} {height}\n{PPM_MAX_VALUE}\n")
}

fn footer(options: &WireOptions) -> String {
    format!(
        "{}\n{}\n{}\n",
        options.offset_x, options.offset_y, options.layer
    )
}

/// Returns the encoded size of a frame without building it.
#[must_use]
pub fn encoded_len(frame: &DisplayFrame, options: &WireOptions) -> usize {
    header(frame.width(), frame.height()).len() + frame.pixels().len() + footer(options).len()
}

/// Encodes a frame as one self-contained flaschen-taschen packet.
///
/// Layout: `P6\n<w> <h>\n255\n`, `w*h*3` raw RGB bytes, then the
/// `<x>\n<y>\n<layer>\n` footer.
pub fn encode_frame(frame: &DisplayFrame, options: &WireOptions) -> Bytes {
    let header = header(frame.width(), frame.height());
    let footer = footer(options);

    let mut packet = BytesMut::with_capacity(header.len() + frame.pixels().len() + footer.len());
    packet.put_slice(header.as_bytes());

    if options.transparent {
        packet.put_slice(frame.pixels());
    } else {
        for rgb in frame.rgb_triples() {
            if rgb == [0, 0, 0] {
                packet.put_slice(&OPAQUE_BLACK);
            } else {
                packet.put_slice(&rgb);
            }
        }
    }

    packet.put_slice(footer.as_bytes());
    packet.freeze()
}

#[cfg(test)]
pub(crate) mod test_support {
    /// Parsed view of a packet, as `ft-server` would read it.
    pub struct ParsedPacket {
        pub width: usize,
        pub height: usize,
        pub max_value: usize,
        pub pixels: Vec<u8>,
        pub footer: String,
    }

    /// Splits a packet into header fields, pixel bytes, and footer.
    pub fn parse_packet(packet: &[u8]) -> ParsedPacket {
        let mut newlines = packet
            .iter()
            .enumerate()
            .filter(|(_, &b)| b == b'\n')
            .map(|(i, _)| i);
        let magic_end = newlines.next().expect("magic line");
        let dims_end = newlines.next().expect("dimension line");
        let max_end = newlines.next().expect("max value line");

        assert_eq!(&packet[..magic_end], b"P6");
        let dims = std::str::from_utf8(&packet[magic_end + 1..dims_end]).unwrap();
        let mut parts = dims.split(' ');
        let width: usize = parts.next().unwrap().parse().unwrap();
        let height: usize = parts.next().unwrap().parse().unwrap();
        let max_value: usize = std::str::from_utf8(&packet[dims_end + 1..max_end])
            .unwrap()
            .parse()
            .unwrap();

        let pixel_start = max_end + 1;
        let pixel_end = pixel_start + width * height * 3;
        ParsedPacket {
            width,
            height,
            max_value,
            pixels: packet[pixel_start..pixel_end.min(packet.len())].to_vec(),
            footer: String::from_utf8_lossy(&packet[pixel_end.min(packet.len())..]).into_owned(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::parse_packet;
    use super::*;

    fn gradient(width: u32, height: u32) -> DisplayFrame {
        let pixels: Vec<u8> = (0..width * height)
            .flat_map(|i| [(i % 256) as u8, 100, 200])
            .collect();
        DisplayFrame::new(width, height, pixels).unwrap()
    }

    #[test]
    fn header_declares_geometry_and_max_value() {
        let frame = gradient(4, 3);
        let packet = encode_frame(&frame, &WireOptions::default());
        assert!(packet.starts_with(b"P6\n4 3\n255\n"));

        let parsed = parse_packet(&packet);
        assert_eq!(parsed.width, 4);
        assert_eq!(parsed.height, 3);
        assert_eq!(parsed.max_value, 255);
        assert_eq!(parsed.pixels.len() / 3, parsed.width * parsed.height);
    }

    #[test]
    fn footer_carries_offset_and_layer() {
        let frame = gradient(2, 2);
        let options = WireOptions {
            offset_x: 3,
            offset_y: 5,
            layer: 2,
            transparent: false,
        };
        let packet = encode_frame(&frame, &options);
        assert!(packet.ends_with(b"3\n5\n2\n"));
        assert_eq!(packet.len(), encoded_len(&frame, &options));
    }

    #[test]
    fn black_is_lifted_unless_transparent() {
        let frame = DisplayFrame::blank(2, 1).unwrap();

        let opaque = parse_packet(&encode_frame(&frame, &WireOptions::default()));
        assert_eq!(opaque.pixels, vec![1, 1, 1, 1, 1, 1]);

        let transparent = parse_packet(&encode_frame(
            &frame,
            &WireOptions {
                transparent: true,
                ..Default::default()
            },
        ));
        assert_eq!(transparent.pixels, vec![0; 6]);
    }

    #[test]
    fn non_black_pixels_pass_through() {
        let frame = gradient(3, 1);
        let parsed = parse_packet(&encode_frame(&frame, &WireOptions::default()));
        assert_eq!(parsed.pixels[3..6], [1, 100, 200]);
        assert_eq!(parsed.footer, "0\n0\n0\n");
    }
}
