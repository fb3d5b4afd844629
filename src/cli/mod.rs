pub mod generate_test_seed;
pub mod seed_congress_trades;
