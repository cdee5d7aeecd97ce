#[cfg(not(windows))]
mod fuzz {
    use std::io::{self, Cursor};

    use honggfuzz::fuzz;
    use lkshell::{
        format::lk::LkImage,
        stream::{FromReader, ToWriter},
    };

    pub fn main() {
        loop {
            fuzz!(|data: &[u8]| {
                let reader = Cursor::new(data);
                if let Ok(image) = LkImage::from_reader(reader) {
                    for partition in image.partitions() {
                        let _ = partition.to_string();
                    }
                    let _ = image.to_writer(io::sink());
                }
            });
        }
    }
}

fn main() {
    #[cfg(not(windows))]
    fuzz::main();
}
