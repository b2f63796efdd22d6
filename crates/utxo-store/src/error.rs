use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sled::Error),

    #[error("record encoding error: {0}")]
    Codec(#[from] bincode::Error),

    #[error("corrupted entry: {0}")]
    Corrupted(String),

    #[error("sync cursor cannot move back from {current} to {requested}")]
    HeightRegression { current: u32, requested: u32 },
}
