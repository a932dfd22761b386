use image::RgbImage;

use crate::error::Error;

/// 水印结束标记，解码时以它定位内容边界，无需单独的长度字段
pub const SENTINEL: &str = "=====";

/// 将文本嵌入图片像素的最低有效位
///
/// 按行优先遍历像素，每个像素依 R、G、B 顺序各写入一个 bit，
/// 只改写最低位，高 7 位保持不变。文本末尾追加 SENTINEL。
pub fn encode(image: &mut RgbImage, text: &str) -> Result<(), Error> {
    let capacity = (image.width() * image.height() * 3) as usize;
    let needed = (text.len() + SENTINEL.len()) * 8;
    if needed > capacity {
        return Err(Error::PayloadTooLarge { needed, capacity });
    }

    let mut payload = Vec::with_capacity(text.len() + SENTINEL.len());
    payload.extend_from_slice(text.as_bytes());
    payload.extend_from_slice(SENTINEL.as_bytes());

    let mut bits = payload.iter().flat_map(|byte| (0..8).rev().map(move |i| (byte >> i) & 1));

    'outer: for pixel in image.pixels_mut() {
        for channel in pixel.0.iter_mut() {
            match bits.next() {
                Some(bit) => *channel = (*channel & !1) | bit,
                None => break 'outer,
            }
        }
    }

    Ok(())
}

/// 从图片最低有效位提取水印文本
///
/// 按与 encode 相同的遍历顺序收集 bit，每 8 bit 组成一个字节，
/// 遇到 SENTINEL 即返回其前的内容。找不到标记时返回空字符串，
/// 调用方应将空结果理解为「无水印」而不是错误。
pub fn decode(image: &RgbImage) -> String {
    let sentinel = SENTINEL.as_bytes();
    let mut bytes: Vec<u8> = vec![];
    let mut current = 0u8;
    let mut nbits = 0;

    for pixel in image.pixels() {
        for channel in pixel.0.iter() {
            current = (current << 1) | (channel & 1);
            nbits += 1;
            if nbits == 8 {
                bytes.push(current);
                current = 0;
                nbits = 0;
                if bytes.ends_with(sentinel) {
                    let text = &bytes[..bytes.len() - sentinel.len()];
                    return String::from_utf8_lossy(text).into_owned();
                }
            }
        }
    }

    String::new()
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("Slab.Boston")]
    #[case("Calacatta Oro #12")]
    #[case("名称=大花绿")]
    fn test_roundtrip(#[case] text: &str) {
        let mut image = RgbImage::from_pixel(32, 32, image::Rgb([120, 64, 200]));
        encode(&mut image, text).unwrap();
        assert_eq!(decode(&image), text);
    }

    #[test]
    fn test_empty_payload_roundtrip() {
        let mut image = RgbImage::from_pixel(8, 8, image::Rgb([0, 0, 0]));
        encode(&mut image, "").unwrap();
        assert_eq!(decode(&image), "");
    }

    #[test]
    fn test_high_bits_untouched() {
        let mut image = RgbImage::from_pixel(16, 16, image::Rgb([200, 100, 50]));
        let original = image.clone();
        encode(&mut image, "watermark").unwrap();
        for (a, b) in original.pixels().zip(image.pixels()) {
            for (x, y) in a.0.iter().zip(b.0.iter()) {
                assert_eq!(x & !1, y & !1);
            }
        }
    }

    #[test]
    fn test_payload_too_large() {
        // 1x1 图片只有 3 bit 容量，连 40 bit 的结束标记都放不下
        let mut image = RgbImage::from_pixel(1, 1, image::Rgb([0, 0, 0]));
        let result = encode(&mut image, "x");
        assert!(matches!(result, Err(Error::PayloadTooLarge { .. })));
    }

    #[test]
    fn test_decode_without_watermark() {
        let image = RgbImage::from_pixel(16, 16, image::Rgb([7, 7, 7]));
        assert_eq!(decode(&image), "");
    }

    #[test]
    fn test_capacity_boundary() {
        // 8x5 图片容量 120 bit，去掉结束标记后正好可写 10 字节
        let mut image = RgbImage::from_pixel(8, 5, image::Rgb([255, 255, 255]));
        encode(&mut image, "0123456789").unwrap();
        assert_eq!(decode(&image), "0123456789");

        let mut image = RgbImage::from_pixel(8, 5, image::Rgb([255, 255, 255]));
        assert!(encode(&mut image, "0123456789a").is_err());
    }
}
