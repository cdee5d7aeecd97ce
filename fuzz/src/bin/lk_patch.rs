#[cfg(not(windows))]
mod fuzz {
    use honggfuzz::fuzz;
    use lkshell::format::lk::LkImage;

    pub fn main() {
        loop {
            fuzz!(|data: &[u8]| {
                // First byte selects the needle length, the rest is the image.
                let Some((&len, rest)) = data.split_first() else {
                    return;
                };
                let len = usize::from(len % 16).min(rest.len());
                let (needle, contents) = rest.split_at(len);

                if let Ok(mut image) = LkImage::from_bytes(contents.to_vec()) {
                    let _ = image.apply_patch(needle, &[0x00, 0x20, 0x70, 0x47]);
                }
            });
        }
    }
}

fn main() {
    #[cfg(not(windows))]
    fuzz::main();
}
