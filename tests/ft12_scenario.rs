//! FT 1.2 variable-frame wire vector from spec.md §8 scenario 5.

use iec60870::ft12::encode_variable;

#[test]
fn variable_frame_matches_pinned_wire_vector() {
    let user_data = [0x68u8, 0x01, 0x06, 0x01, 0x01, 0x00, 0x14];
    // Primary, user-data-confirmed (function 3), FCB=1 FCV=1 PRM=1:
    // 0x40 | 0x20 | 0x10 | 0x03 = 0x73.
    let control = 0x73u8;
    let address = 3u32;

    let encoded = encode_variable(control, address, 1, &user_data);

    let checksum = (control as u32 + address + user_data.iter().map(|b| *b as u32).sum::<u32>()) % 256;

    assert_eq!(encoded[0], 0x68);
    assert_eq!(encoded[1], 0x09);
    assert_eq!(encoded[2], 0x09);
    assert_eq!(encoded[3], 0x68);
    assert_eq!(encoded[4], 0x73);
    assert_eq!(encoded[5], 0x03);
    assert_eq!(&encoded[6..13], &user_data[..]);
    assert_eq!(encoded[13], checksum as u8);
    assert_eq!(encoded[14], 0x16);
    assert_eq!(encoded.len(), 15);
}
