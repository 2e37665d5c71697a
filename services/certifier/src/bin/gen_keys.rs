use clap::{App, Arg};
use ferrite::crypto;
use std::fs;
use std::path::Path;
use std::process;

fn main() {
    let matches = App::new("Key Generator")
        .version("1.0")
        .author("Conduit Works")
        .about("Generates an RSA keypair and writes it out as PEM files.")
        .arg(
            Arg::with_name("OUT_DIR")
                .help("Directory the key files are written to")
                .required(true),
        )
        .arg(
            Arg::with_name("BITS")
                .help("Modulus size in bits (default 2048)")
                .required(false),
        )
        .get_matches();

    let out_dir = matches.value_of("OUT_DIR").unwrap();
    let bits: usize = matches
        .value_of("BITS")
        .unwrap_or("2048")
        .parse()
        .expect("Bit count must be a valid integer");

    println!("Generating {} bit keypair", bits);

    let key = match crypto::generate_keypair(bits) {
        Ok(key) => key,
        Err(err) => {
            eprintln!("Key generation failed: {}", err);
            process::exit(1);
        }
    };

    let private_pem = crypto::export_private_pem(&key).expect("Private key export failed");
    let public_pem =
        crypto::export_public_pem(&key.to_public_key()).expect("Public key export failed");

    let out_dir = Path::new(out_dir);
    fs::write(out_dir.join("private.pem"), private_pem).expect("Error writing private key file");
    fs::write(out_dir.join("public.pem"), public_pem).expect("Error writing public key file");

    println!("Wrote private.pem and public.pem to `{}`", out_dir.display());
}
