use coremap::CMap;
use std::sync::Arc;
use std::thread::spawn;

fn main() {
    let map = Arc::new(CMap::<String, String>::with_capacity(1000));
    let nthreads = 30;
    let put = 1000;
    let get = 100_000;

    let threads: Vec<_> = (0..nthreads)
        .flat_map(|n| {
            let writer_map = Arc::clone(&map);
            let reader_map = Arc::clone(&map);

            let writer = spawn(move || {
                for i in 0..put {
                    writer_map.emplace(format!("key {i}"), format!("value {i} t {n}"));
                }
            });

            let reader = spawn(move || {
                for i in 0..get {
                    let key = format!("key {}", i % put);
                    reader_map.get(&key);
                }
            });

            vec![writer, reader]
        })
        .collect();

    for t in threads {
        t.join().expect("thread panicked");
    }

    println!("final size: {}", map.len());
}
