//! S7数据编解码工具
//!
//! 真实连接和模拟连接共用同一套编解码逻辑，保证两种模式下
//! 字节级行为完全一致（调试模式下录制的数据可以直接回放）。

use chrono::NaiveDateTime;

/// 从字节中取出指定位
pub fn get_bit(byte: u8, bit: u8) -> bool {
    byte & (1 << bit) != 0
}

/// 在字节中设置指定位，返回新字节
pub fn set_bit(byte: u8, bit: u8, value: bool) -> u8 {
    if value {
        byte | (1 << bit)
    } else {
        byte & !(1 << bit)
    }
}

/// 解码16位有符号整数（大端，二进制补码）
pub fn decode_int(bytes: &[u8]) -> i16 {
    if bytes.len() < 2 {
        return 0;
    }
    i16::from_be_bytes([bytes[0], bytes[1]])
}

/// 编码16位有符号整数（大端）
pub fn encode_int(value: i16) -> [u8; 2] {
    value.to_be_bytes()
}

/// 解码32位浮点数（大端）
pub fn decode_real(bytes: &[u8]) -> f32 {
    if bytes.len() < 4 {
        return 0.0;
    }
    f32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

/// 解码S7格式字符串
///
/// 线上布局: [容量][实际长度][ASCII内容，零填充]，共 max_size+2 字节。
/// 长度字节超过容量时按容量截断（现场偶见PLC程序写坏长度字节），
/// 非ASCII字节直接丢弃。缓冲不足以容纳完整字符串时返回空串。
pub fn decode_s7_string(bytes: &[u8], max_size: u8) -> String {
    let wire_len = max_size as usize + 2;
    if bytes.len() < wire_len {
        return String::new();
    }
    let actual_len = (bytes[1] as usize).min(max_size as usize);
    bytes[2..2 + actual_len]
        .iter()
        .filter(|b| b.is_ascii())
        .map(|&b| b as char)
        .collect()
}

/// 编码S7格式字符串（超长自动截断，不足零填充）
pub fn encode_s7_string(value: &str, max_size: u8) -> Vec<u8> {
    let mut buf = vec![0u8; max_size as usize + 2];
    buf[0] = max_size;
    let truncated: Vec<u8> = value
        .bytes()
        .take(max_size as usize)
        .collect();
    buf[1] = truncated.len() as u8;
    buf[2..2 + truncated.len()].copy_from_slice(&truncated);
    buf
}

/// 单字节BCD解码
fn from_bcd(b: u8) -> u32 {
    ((b >> 4) as u32) * 10 + (b & 0x0F) as u32
}

/// 解码S7 DATE_AND_TIME（8字节BCD）
///
/// 字节布局: 年(90..99=19xx, 00..89=20xx) 月 日 时 分 秒 毫秒高两位 [毫秒低位|星期]。
/// 任何字段非法（如PLC上电后DB还是全零导致月为0）返回None。
pub fn decode_date_time(bytes: &[u8]) -> Option<NaiveDateTime> {
    if bytes.len() < 8 {
        return None;
    }
    let raw_year = from_bcd(bytes[0]);
    let year = if raw_year >= 90 {
        1900 + raw_year as i32
    } else {
        2000 + raw_year as i32
    };
    let month = from_bcd(bytes[1]);
    let day = from_bcd(bytes[2]);
    let hour = from_bcd(bytes[3]);
    let minute = from_bcd(bytes[4]);
    let second = from_bcd(bytes[5]);
    let millis = from_bcd(bytes[6]) * 10 + (bytes[7] >> 4) as u32;

    chrono::NaiveDate::from_ymd_opt(year, month, day)?
        .and_hms_milli_opt(hour, minute, second, millis)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bit_roundtrip() {
        let byte = set_bit(0x00, 3, true);
        assert_eq!(byte, 0x08);
        assert!(get_bit(byte, 3));
        assert!(!get_bit(byte, 2));
        assert_eq!(set_bit(byte, 3, false), 0x00);
    }

    #[test]
    fn test_int_big_endian_twos_complement() {
        assert_eq!(decode_int(&[0x00, 0x2A]), 42);
        assert_eq!(decode_int(&[0xFF, 0xFF]), -1);
        assert_eq!(decode_int(&[0x80, 0x00]), i16::MIN);
        assert_eq!(encode_int(-1), [0xFF, 0xFF]);
        // 缓冲不足返回0
        assert_eq!(decode_int(&[0x01]), 0);
    }

    #[test]
    fn test_string_encode_layout() {
        let buf = encode_s7_string("AB", 4);
        assert_eq!(buf, vec![4, 2, b'A', b'B', 0, 0]);
    }

    #[test]
    fn test_string_truncation() {
        let buf = encode_s7_string("ABCDEF", 4);
        assert_eq!(buf[0], 4);
        assert_eq!(buf[1], 4);
        assert_eq!(decode_s7_string(&buf, 4), "ABCD");
    }

    #[test]
    fn test_string_decode_clamps_bad_length_byte() {
        // 长度字节声称10，容量只有4
        let buf = vec![4, 10, b'X', b'Y', b'Z', b'W'];
        assert_eq!(decode_s7_string(&buf, 4), "XYZW");
    }

    #[test]
    fn test_string_decode_drops_non_ascii() {
        let buf = vec![4, 4, b'A', 0xFF, b'B', 0x80];
        assert_eq!(decode_s7_string(&buf, 4), "AB");
    }

    #[test]
    fn test_string_decode_short_buffer() {
        assert_eq!(decode_s7_string(&[4, 2, b'A'], 4), "");
    }

    #[test]
    fn test_date_time_bcd() {
        // 2024-03-15 10:30:45.120
        let bytes = [0x24, 0x03, 0x15, 0x10, 0x30, 0x45, 0x12, 0x05];
        let dt = decode_date_time(&bytes).unwrap();
        assert_eq!(dt.format("%Y-%m-%d %H:%M:%S%.3f").to_string(), "2024-03-15 10:30:45.120");
    }

    #[test]
    fn test_date_time_century_split() {
        // 年=95 表示1995
        let bytes = [0x95, 0x01, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00];
        let dt = decode_date_time(&bytes).unwrap();
        assert_eq!(dt.format("%Y").to_string(), "1995");
    }

    #[test]
    fn test_date_time_invalid_returns_none() {
        // 全零：月为0非法
        assert_eq!(decode_date_time(&[0; 8]), None);
        // 缓冲不足
        assert_eq!(decode_date_time(&[0x24, 0x03]), None);
    }

    #[test]
    fn test_real_big_endian() {
        let bytes = 12.5f32.to_be_bytes();
        assert_eq!(decode_real(&bytes), 12.5);
        assert_eq!(decode_real(&bytes[..3]), 0.0);
    }
}
