/*
MIT License

Copyright (c) 2021 Philipp Schuster

Permission is hereby granted, free of charge, to any person obtaining a copy
of this software and associated documentation files (the "Software"), to deal
in the Software without restriction, including without limitation the rights
to use, copy, modify, merge, publish, distribute, sublicense, and/or sell
copies of the Software, and to permit persons to whom the Software is
furnished to do so, subject to the following conditions:

The above copyright notice and this permission notice shall be included in all
copies or substantial portions of the Software.

THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM,
OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE
SOFTWARE.
*/
use std::fs::File;
use tar_stream::TarReader;

/// Lists the entries of the Tar archive given as first argument.
fn main() -> Result<(), Box<dyn std::error::Error>> {
    // log: not mandatory
    std::env::set_var("RUST_LOG", "trace");
    env_logger::init();

    let path = std::env::args()
        .nth(1)
        .ok_or("usage: list <archive.tar>")?;
    let mut reader = TarReader::seekable(File::open(path)?)?;
    for entry in reader.entries() {
        let entry = entry?;
        let header = entry.header();
        print!(
            "{:?} {:o} {:>10} {}",
            header.type_flag, header.mode, header.size, header.name
        );
        if header.type_flag.is_link() {
            print!(" -> {}", header.link_name);
        }
        println!();
    }
    Ok(())
}
