use s3cret_crypto::{EncryptedRecord, NONCE_SIZE, TAG_SIZE};
use s3cret_transfer::PartAssembler;

const CHUNK: usize = 16384;
const MIN_PART: usize = 5_243_000;

fn make_records(total: usize) -> Vec<EncryptedRecord> {
    let count = total.div_ceil(CHUNK).max(1);
    (0..count)
        .map(|i| {
            let len = if i + 1 == count { total - i * CHUNK } else { CHUNK };
            EncryptedRecord {
                index: i as u64,
                nonce: [i as u8; NONCE_SIZE],
                ciphertext: vec![(i % 251) as u8; len + TAG_SIZE],
                is_final: i + 1 == count,
            }
        })
        .collect()
}

#[divan::bench(args = [1048576, 10485760, 33554432])]
fn assemble_parts(bencher: divan::Bencher, size: usize) {
    let records = make_records(size);
    bencher
        .counter(divan::counter::BytesCount::new(size))
        .bench(|| {
            let mut assembler = PartAssembler::new(MIN_PART);
            let mut parts = 0usize;
            for record in divan::black_box(&records) {
                parts += usize::from(assembler.push(record).is_some());
            }
            match assembler.finish() {
                Ok(rest) => parts + rest.len(),
                Err(undersized) => undersized.body.len(),
            }
        });
}

fn main() {
    divan::main();
}
