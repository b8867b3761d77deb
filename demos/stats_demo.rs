use std::hash::BuildHasher;
use std::hash::RandomState;

use chain_hash::HashTable;
use chain_hash::hash_table::Entry;
use clap::Parser;

#[derive(Parser, Debug)]
struct Args {
    #[arg(short = 'c', long = "target_capacity", default_value_t = 1000)]
    target_capacity: usize,

    #[arg(short = 'l', long = "max_load_factor", default_value_t = 0.8)]
    max_load_factor: f32,

    /// Remove every n-th value after filling, 0 to skip.
    #[arg(short = 'r', long = "remove_every", default_value_t = 0)]
    remove_every: usize,
}

fn main() {
    let args = Args::parse();
    let state = RandomState::new();

    println!(
        "Creating HashTable with target capacity: {} (max load factor {:.3})",
        args.target_capacity, args.max_load_factor
    );

    let mut table: HashTable<u64> = HashTable::new();
    table.set_max_load_factor(args.max_load_factor);
    if let Err(e) = table.try_reserve(args.target_capacity) {
        eprintln!("Failed to reserve {}: {e}", args.target_capacity);
        return;
    }

    println!(
        "Actual capacity: {} ({} buckets)",
        table.capacity(),
        table.bucket_count()
    );
    println!("Filling table with u64 values...");

    let num_values = table.capacity() as u64;
    for value in 0..num_values {
        let hash = state.hash_one(value);
        match table.try_entry(hash, |&v| v == value) {
            Ok(Entry::Vacant(entry)) => {
                entry.insert(value);
            }
            Ok(Entry::Occupied(_)) => {
                panic!("Value already exists in table: {}", value);
            }
            Err(e) => {
                eprintln!("Insertion of {value} failed: {e}");
                return;
            }
        }
    }

    if args.remove_every > 0 {
        let step = args.remove_every as u64;
        table.retain(|v| *v % step != 0);
        println!("Removed every {}th value", args.remove_every);
    }

    println!("Table holds {} values", table.len());
    println!(
        "Final load factor: {:.2}% of buckets, {:.2}% of capacity",
        table.load_factor() * 100.0,
        (table.len() as f64 / table.capacity() as f64) * 100.0
    );

    table.chain_histogram().print();
    table.debug_stats().print();
}
