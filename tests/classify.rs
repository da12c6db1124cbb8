use pretty_assertions::assert_eq;

use notable::abi::RO_ROOT;
use notable::{
    Classifier, Error, Runtime, SimulatedMemory, ZombieCache, ZombieEntry,
};

mod support;
use support::{encode_tagged_string, install_class, tagged_number, ClassAddrs};

const OBJECT: u64 = 0x40_0000;
const CLASS: u64 = 0x50_0000;
const ROOT: u64 = 0x60_0000;

fn widget_image() -> SimulatedMemory {
    let mut mem = SimulatedMemory::new();
    install_class(&mut mem, ClassAddrs::at(ROOT), "NSObject", RO_ROOT, 0, 0);
    install_class(&mut mem, ClassAddrs::at(CLASS), "Widget", 0, ROOT, 0);
    mem.map(OBJECT, CLASS.to_le_bytes().to_vec());
    mem
}

#[test]
fn test_null_is_never_notable() {
    let mem = SimulatedMemory::new();
    let classifier = Classifier::new(&mem, Runtime::x86_64());

    assert!(!classifier.is_notable(0));

    let mut buf = [0u8; 64];
    let verdict = classifier.evaluate(0, &mut buf);
    assert!(!verdict.notable);
    assert_eq!(verdict.len, 0);
}

#[test]
fn test_tagged_number_is_notable_and_described() {
    let mem = SimulatedMemory::new();
    let classifier = Classifier::new(&mem, Runtime::x86_64());

    let word = tagged_number(42);
    assert!(classifier.is_notable(word));

    let mut buf = [0u8; 64];
    let text = classifier.describe_str(word, &mut buf).unwrap();
    assert!(text.starts_with("<NSNumber: 0x"), "got {:?}", text);
    // The decoded value follows the bracketed name and address.
    assert!(text.ends_with(">: 42"), "got {:?}", text);
    assert_eq!(text, format!("<NSNumber: {:#x}>: 42", word));
}

#[test]
fn test_tagged_date_appends_decoded_value() {
    let mem = SimulatedMemory::new();
    let classifier = Classifier::new(&mem, Runtime::x86_64());

    let seconds = 12345.5f64;
    let word = support::tagged_word_x86_64(6, seconds.to_bits() >> 4);

    let mut buf = [0u8; 64];
    let text = classifier.describe_str(word, &mut buf).unwrap();
    assert_eq!(text, format!("<NSDate: {:#x}>: 12345.5", word));
}

#[test]
fn test_invalid_tagged_shape_is_rejected_without_probing() {
    let mem = SimulatedMemory::new();
    let classifier = Classifier::new(&mem, Runtime::x86_64());

    // Tagged-shaped (low bit set) but slot 7 is unused: not notable, and
    // no memory may be touched deciding that.
    let word = support::tagged_word_x86_64(7, 0xabcdef);
    mem.reset_probe_count();

    assert!(!classifier.is_notable(word));
    assert_eq!(mem.probe_count(), 0);
}

#[test]
fn test_tagged_string_describes_its_characters() {
    let mem = SimulatedMemory::new();
    let classifier = Classifier::new(&mem, Runtime::x86_64());

    let word = encode_tagged_string("launch");
    assert!(classifier.is_notable(word));

    let mut buf = [0u8; 64];
    let text = classifier.describe_str(word, &mut buf).unwrap();
    assert_eq!(text, "launch");
}

#[test]
fn test_heap_object_describes_class_and_address() {
    let mem = widget_image();
    let classifier = Classifier::new(&mem, Runtime::x86_64());

    assert!(classifier.is_notable(OBJECT));

    let mut buf = [0u8; 64];
    let text = classifier.describe_str(OBJECT, &mut buf).unwrap();
    assert_eq!(text, format!("<Widget: {:#x}>", OBJECT));
}

#[test]
fn test_plausible_string_fallback() {
    let mut mem = SimulatedMemory::new();
    let mut region = b"fault while appending to log".to_vec();
    region.push(0);
    region.resize(600, 0);
    mem.map(OBJECT, region);

    let classifier = Classifier::new(&mem, Runtime::x86_64());
    assert!(classifier.is_notable(OBJECT));

    let mut buf = [0u8; 64];
    let text = classifier.describe_str(OBJECT, &mut buf).unwrap();
    assert_eq!(text, "fault while appending to log");
}

#[test]
fn test_zeroed_memory_is_not_notable() {
    let mut mem = SimulatedMemory::new();
    mem.map(OBJECT, vec![0u8; 600]);

    let classifier = Classifier::new(&mem, Runtime::x86_64());
    assert!(!classifier.is_notable(OBJECT));
}

#[test]
fn test_unmapped_address_fails_fast() {
    let mem = SimulatedMemory::new();
    let classifier = Classifier::new(&mem, Runtime::x86_64());

    mem.reset_probe_count();
    assert!(!classifier.is_notable(0xdead_0000));

    // One failed header probe ends the structured walk; one failed window
    // copy ends the string heuristic. No further probing is allowed.
    assert_eq!(mem.probe_count(), 2);
}

#[test]
fn test_zombie_cache_hit_is_notable() {
    let mem = SimulatedMemory::new();

    // The address is unmapped; only the cache knows it.
    let addr = 0x1230u64;
    let mut entries = [ZombieEntry::empty(); 4];
    let slot = ((addr >> 4) & 3) as usize;
    entries[slot].address = addr;
    entries[slot].class_name[..9].copy_from_slice(b"Delegate\0");

    let cache = ZombieCache::new(&entries).unwrap();
    let classifier = Classifier::new(&mem, Runtime::x86_64()).with_zombie_cache(cache);

    assert!(classifier.is_notable(addr));

    let mut buf = [0u8; 64];
    let text = classifier.describe_str(addr, &mut buf).unwrap();
    assert_eq!(text, format!("<Delegate: {:#x}>", addr));

    // A different address hashing to another slot misses.
    assert!(!classifier.is_notable(0x4560));
}

#[test]
fn test_zombie_cache_requires_power_of_two() {
    let entries = [ZombieEntry::empty(); 3];
    assert!(matches!(
        ZombieCache::new(&entries),
        Err(Error::InvalidCacheLen { len: 3 })
    ));

    let empty: [ZombieEntry; 0] = [];
    assert!(ZombieCache::new(&empty).is_err());
}

#[test]
fn test_description_truncation_is_reported() {
    let mem = SimulatedMemory::new();
    let classifier = Classifier::new(&mem, Runtime::x86_64());

    let word = tagged_number(1234567);

    let mut tiny = [0u8; 8];
    let description = classifier.describe(word, &mut tiny);
    assert!(description.truncated);
    assert_eq!(description.len, tiny.len());

    let mut tiny = [0u8; 8];
    assert!(matches!(
        classifier.describe_str(word, &mut tiny),
        Err(Error::FormatTruncated)
    ));
}

#[test]
fn test_evaluate_pairs_notability_with_description() {
    let mem = widget_image();
    let classifier = Classifier::new(&mem, Runtime::x86_64());

    let mut buf = [0u8; 64];
    let verdict = classifier.evaluate(OBJECT, &mut buf);
    assert!(verdict.notable);
    assert!(!verdict.truncated);
    assert_eq!(
        &buf[..verdict.len],
        format!("<Widget: {:#x}>", OBJECT).as_bytes()
    );
}
