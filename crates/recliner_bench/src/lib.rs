//! Benchmark utilities.

use rand::Rng;
use recliner_codec::{value, Value};
use recliner_core::Database;

const CITIES: [&str; 6] = ["Oslo", "Lima", "Pune", "Kyiv", "Accra", "Quito"];

/// Generates a random person-shaped document.
pub fn random_doc(rng: &mut impl Rng) -> Value {
    let city = CITIES[rng.gen_range(0..CITIES.len())];
    let name: String = (0..8)
        .map(|_| char::from(rng.gen_range(b'a'..=b'z')))
        .collect();
    value!({
        "name": name,
        "age": rng.gen_range(18..90),
        "score": rng.gen::<f64>() * 100.0,
        "address": {"city": city, "zip": rng.gen_range(1000..9999)},
        "tags": ["bench", city],
    })
}

/// Generates `count` random documents.
pub fn random_docs(count: usize) -> Vec<Value> {
    let mut rng = rand::thread_rng();
    (0..count).map(|_| random_doc(&mut rng)).collect()
}

/// Writes `count` random documents to `db` under ids `p000000..`.
pub fn fill(db: &Database, count: usize) {
    for (i, doc) in random_docs(count).into_iter().enumerate() {
        db.put(&format!("p{i:06}"), doc, None)
            .expect("Failed to write benchmark document");
    }
}
