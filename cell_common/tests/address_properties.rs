//! Property checks for device address parsing.

use cell_common::address::{DeviceCode, SignalAddress};
use proptest::prelude::*;

fn device() -> impl Strategy<Value = DeviceCode> {
    prop_oneof![
        Just(DeviceCode::X),
        Just(DeviceCode::Y),
        Just(DeviceCode::M),
        Just(DeviceCode::L),
        Just(DeviceCode::B),
        Just(DeviceCode::D),
        Just(DeviceCode::W),
        Just(DeviceCode::R),
    ]
}

proptest! {
    #[test]
    fn canonical_text_parses_back(device in device(), number in 0u32..0x10000) {
        let address = SignalAddress::new(device, number);
        let text = address.to_string();
        prop_assert_eq!(SignalAddress::parse(&text).unwrap(), address);
        prop_assert_eq!(SignalAddress::parse(&text.to_lowercase()).unwrap(), address);
    }

    #[test]
    fn arbitrary_text_never_panics(text in "\\PC{0,8}") {
        if let Ok(address) = SignalAddress::parse(&text) {
            prop_assert_eq!(SignalAddress::parse(&address.to_string()).unwrap(), address);
        }
    }

    #[test]
    fn word_devices_are_never_bits(device in device(), number in 0u32..1000) {
        let address = SignalAddress::new(device, number);
        prop_assert_ne!(address.is_word(), address.is_bit());
        prop_assert_eq!(
            address.is_word(),
            matches!(device, DeviceCode::D | DeviceCode::W | DeviceCode::R)
        );
    }
}
