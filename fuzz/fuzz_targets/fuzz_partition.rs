#![no_main]

use libfuzzer_sys::fuzz_target;
use zlehcito_client::partition::partition;

fuzz_target!(|data: &[u8]| {
    let Some((head, rest)) = data.split_first_chunk::<8>() else {
        return;
    };
    let [a, b, c, d, e, f, g, h] = *head;
    let round_count = i32::from_le_bytes([a, b, c, d]);
    let round_index = i32::from_le_bytes([e, f, g, h]);

    let shard = partition(rest, round_count, round_index);
    assert!(shard.len() <= rest.len());
});
