use kdbx_keeper::binary::{Cipher, KdfAlgorithm, KdfParams};
use kdbx_keeper::codec::Codec;
use kdbx_keeper::crypto::{argon2_kdf, Argon2Request};
use kdbx_keeper::database::{EntryDraft, EntryFilter};

const DATABASE_NAME: &str = "BarName";
const ENTRY_TITLE: &str = "Bar";
const ENTRY_PASSWORD: &str = "kdbxkeeper";
const DATABASE_PASSWORD: &str = "blahblahblah";

fn codec() -> Codec {
    // Full-cost Argon2 parameters make the suite needlessly slow
    Codec::with_kdf(Box::new(|request| {
        argon2_kdf(&Argon2Request {
            secret: request.secret,
            salt: request.salt,
            memory_kib: 64,
            iterations: 1,
            parallelism: 1,
            hash_length: request.hash_length,
            variant: request.variant,
            version: request.version,
        })
    }))
}

fn draft(title: &str) -> EntryDraft {
    EntryDraft {
        title: title.to_string(),
        username: "user@example.com".to_string(),
        password: ENTRY_PASSWORD.to_string(),
        url: "https://example.com".to_string(),
        notes: "some notes".to_string(),
        tags: vec!["work".to_string(), "mail".to_string()],
        group_id: None,
    }
}

#[test]
fn round_trip_default_cipher() {
    let codec = codec();
    let mut archive = codec.create(DATABASE_NAME, DATABASE_PASSWORD).unwrap();
    let now = chrono::Utc::now().naive_utc();
    let created = archive.vault_mut().create_entry(draft(ENTRY_TITLE), now);

    let bytes = codec.save(&archive).unwrap();
    let reloaded = codec.load(&bytes, DATABASE_PASSWORD).unwrap();

    assert_eq!(reloaded.vault().name(), DATABASE_NAME);
    let entries = reloaded.vault().list_entries(&EntryFilter::default());
    assert_eq!(entries.len(), 1);
    let entry = &entries[0];
    assert_eq!(entry.id, created.id);
    assert_eq!(entry.title, ENTRY_TITLE);
    assert_eq!(entry.username, "user@example.com");
    assert_eq!(entry.password, ENTRY_PASSWORD);
    assert_eq!(entry.url, "https://example.com");
    assert_eq!(entry.notes, "some notes");
    assert_eq!(entry.tags, vec!["work", "mail"]);
    assert_eq!(entry.creation_time, created.creation_time);
    assert_eq!(entry.last_mod_time, created.last_mod_time);
}

#[test]
fn round_trip_chacha20_cipher() {
    let codec = codec();
    let mut archive = codec.create(DATABASE_NAME, DATABASE_PASSWORD).unwrap();
    archive.header_mut().cipher = Cipher::ChaCha20;
    let now = chrono::Utc::now().naive_utc();
    archive.vault_mut().create_entry(draft(ENTRY_TITLE), now);

    let bytes = codec.save(&archive).unwrap();
    let reloaded = codec.load(&bytes, DATABASE_PASSWORD).unwrap();
    let entries = reloaded.vault().list_entries(&EntryFilter::default());
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].password, ENTRY_PASSWORD);
}

#[test]
fn round_trip_argon2id() {
    let codec = codec();
    let mut archive = codec.create(DATABASE_NAME, DATABASE_PASSWORD).unwrap();
    if let KdfParams::Argon2 { algorithm, .. } = &mut archive.header_mut().kdf_params {
        *algorithm = KdfAlgorithm::Argon2id;
    }
    // Re-key so the master key matches the adjusted KDF parameters
    let key = kdbx_keeper::CompositeKey::from_password(DATABASE_PASSWORD);
    archive
        .set_key(&key, &|request: &Argon2Request<'_>| {
            argon2_kdf(&Argon2Request {
                secret: request.secret,
                salt: request.salt,
                memory_kib: 64,
                iterations: 1,
                parallelism: 1,
                hash_length: request.hash_length,
                variant: request.variant,
                version: request.version,
            })
        })
        .unwrap();

    let bytes = codec.save(&archive).unwrap();
    let reloaded = codec.load(&bytes, DATABASE_PASSWORD).unwrap();
    assert_eq!(reloaded.vault().name(), DATABASE_NAME);
}

#[test]
fn round_trip_preserves_history_and_recycle_bin() {
    let codec = codec();
    let mut archive = codec.create(DATABASE_NAME, DATABASE_PASSWORD).unwrap();
    let now = chrono::Utc::now().naive_utc();
    let created = archive.vault_mut().create_entry(draft("Mutable"), now);
    archive
        .vault_mut()
        .update_entry(
            kdbx_keeper::database::EntryPatch {
                id: created.id,
                title: Some("Mutated".to_string()),
                username: None,
                password: None,
                url: None,
                notes: None,
                tags: None,
            },
            now + chrono::Duration::seconds(1),
        )
        .unwrap();
    let doomed = archive.vault_mut().create_entry(draft("Doomed"), now);
    assert!(archive.vault_mut().delete_entry(doomed.id, now));

    let bytes = codec.save(&archive).unwrap();
    let reloaded = codec.load(&bytes, DATABASE_PASSWORD).unwrap();

    let entry = reloaded
        .vault()
        .find_entry(|e| e.uuid() == created.id)
        .unwrap();
    assert_eq!(entry.title(), Some("Mutated"));
    assert_eq!(entry.history().len(), 1);
    assert_eq!(entry.history().get(0).unwrap().title(), Some("Mutable"));

    // The recycled entry is hidden from enumeration but still stored
    let visible = reloaded.vault().list_entries(&EntryFilter::default());
    assert!(visible.iter().all(|e| e.title != "Doomed"));
    assert!(reloaded.vault().get_entry(doomed.id).is_some());
}

#[test]
fn wrong_key_is_rejected_as_invalid_key() {
    let codec = codec();
    let archive = codec.create(DATABASE_NAME, DATABASE_PASSWORD).unwrap();
    let bytes = codec.save(&archive).unwrap();

    match codec.load(&bytes, "not the password") {
        Err(kdbx_keeper::codec::CodecError::InvalidKey) => {}
        other => panic!("expected InvalidKey, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn unsupported_version_is_rejected() {
    let codec = codec();
    let archive = codec.create(DATABASE_NAME, DATABASE_PASSWORD).unwrap();
    let mut bytes = codec.save(&archive).unwrap();
    // Major version lives at offset 10 after the two magic numbers
    bytes[10] = 3;

    match codec.load(&bytes, DATABASE_PASSWORD) {
        Err(kdbx_keeper::codec::CodecError::Unsupported(_)) => {}
        other => panic!("expected Unsupported, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn flipped_payload_byte_does_not_pass_as_wrong_password() {
    let codec = codec();
    let archive = codec.create(DATABASE_NAME, DATABASE_PASSWORD).unwrap();
    let mut bytes = codec.save(&archive).unwrap();
    let last = bytes.len() - 1;
    bytes[last] ^= 0xFF;

    // Payload corruption fails the HMAC stream; the important part is
    // that the archive does not load
    assert!(codec.load(&bytes, DATABASE_PASSWORD).is_err());
}
