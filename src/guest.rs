//! Fixed playlists for guest mode, served without a credential or network.

use crate::models::{AlbumInfo, PlaylistSummary, PoolSource, Track};

struct GuestPlaylist {
    id: &'static str,
    name: &'static str,
    image_url: &'static str,
    /// (id, title, artist)
    tracks: &'static [(&'static str, &'static str, &'static str)],
}

const GUEST_PLAYLISTS: &[GuestPlaylist] = &[
    GuestPlaylist {
        id: "guest_top_hits",
        name: "Top Hits",
        image_url: "https://charts-images.scdn.co/assets/locale_en/regional/weekly/region_global_default.jpg",
        tracks: &[
            ("gh1", "As It Was", "Harry Styles"),
            ("gh2", "Anti-Hero", "Taylor Swift"),
            ("gh3", "Flowers", "Miley Cyrus"),
            ("gh4", "Kill Bill", "SZA"),
            ("gh5", "Creepin'", "Metro Boomin, The Weeknd, 21 Savage"),
            ("gh6", "Cruel Summer", "Taylor Swift"),
            ("gh7", "Vampire", "Olivia Rodrigo"),
            ("gh8", "Calm Down", "Rema & Selena Gomez"),
            ("gh9", "Last Night", "Morgan Wallen"),
            ("gh10", "Dance The Night", "Dua Lipa"),
        ],
    },
    GuestPlaylist {
        id: "guest_rock_classics",
        name: "Rock Classics",
        image_url: "https://i.scdn.co/image/ab67706f00000003ae5a452a3d0edcf819129532",
        tracks: &[
            ("gr1", "Bohemian Rhapsody", "Queen"),
            ("gr2", "Hotel California", "Eagles"),
            ("gr3", "Sweet Child O' Mine", "Guns N' Roses"),
            ("gr4", "Livin' On A Prayer", "Bon Jovi"),
            ("gr5", "Back In Black", "AC/DC"),
            ("gr6", "Don't Stop Believin'", "Journey"),
            ("gr7", "Smells Like Teen Spirit", "Nirvana"),
            ("gr8", "Sweet Home Alabama", "Lynyrd Skynyrd"),
            ("gr9", "Fortunate Son", "Creedence Clearwater Revival"),
            ("gr10", "Mr. Brightside", "The Killers"),
        ],
    },
];

pub fn guest_playlists() -> Vec<PlaylistSummary> {
    GUEST_PLAYLISTS
        .iter()
        .map(|p| PlaylistSummary {
            source: PoolSource::Guest(p.id.to_string()),
            name: p.name.to_string(),
            track_total: Some(p.tracks.len() as u32),
            image_url: Some(p.image_url.to_string()),
        })
        .collect()
}

/// Tracks of a guest playlist, or `None` for an unknown id.
pub fn guest_tracks(playlist_id: &str) -> Option<Vec<Track>> {
    let playlist = GUEST_PLAYLISTS.iter().find(|p| p.id == playlist_id)?;
    Some(
        playlist
            .tracks
            .iter()
            .map(|(id, title, artist)| Track {
                id: id.to_string(),
                title: title.to_string(),
                artists: vec![artist.to_string()],
                album: Some(AlbumInfo::default()),
                is_local: false,
            })
            .collect(),
    )
}
