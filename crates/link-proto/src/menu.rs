//! Menu item types.
//!
//! The wire protocol tags each menu item/row with a numeric type so a
//! client can decide how to render or dereference it without parsing its
//! label. The real protocol's numeric assignments aren't specified here;
//! what matters for this crate is that the set is closed with a documented
//! `Unknown` fallback, matching the framing rule in [`crate::message`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MenuItemType {
    Folder,
    Track,
    Playlist,
    Artist,
    Album,
    Genre,
    Label,
    Key,
    Bpm,
    Rating,
    Color,
    Time,
    Bitrate,
    Year,
    Title,
    SearchResult,
    /// Track's original (pre-remix) artist, distinct from [`MenuItemType::Artist`].
    OriginalArtist,
    /// Remixer credit. Kept independent of [`MenuItemType::Album`] — the two
    /// must never be parsed through the same fallback branch.
    Remixer,
    Comment,
    DateAdded,
    Unknown(u8),
}

impl MenuItemType {
    pub fn from_u8(value: u8) -> Self {
        match value {
            0x01 => MenuItemType::Folder,
            0x02 => MenuItemType::Track,
            0x03 => MenuItemType::Playlist,
            0x04 => MenuItemType::Artist,
            0x05 => MenuItemType::Album,
            0x06 => MenuItemType::Genre,
            0x07 => MenuItemType::Label,
            0x08 => MenuItemType::Key,
            0x09 => MenuItemType::Bpm,
            0x0a => MenuItemType::Rating,
            0x0b => MenuItemType::Color,
            0x0c => MenuItemType::Time,
            0x0d => MenuItemType::Bitrate,
            0x0e => MenuItemType::Year,
            0x0f => MenuItemType::Title,
            0x10 => MenuItemType::SearchResult,
            0x11 => MenuItemType::OriginalArtist,
            0x12 => MenuItemType::Remixer,
            0x13 => MenuItemType::Comment,
            0x14 => MenuItemType::DateAdded,
            other => MenuItemType::Unknown(other),
        }
    }

    pub fn to_u8(self) -> u8 {
        match self {
            MenuItemType::Folder => 0x01,
            MenuItemType::Track => 0x02,
            MenuItemType::Playlist => 0x03,
            MenuItemType::Artist => 0x04,
            MenuItemType::Album => 0x05,
            MenuItemType::Genre => 0x06,
            MenuItemType::Label => 0x07,
            MenuItemType::Key => 0x08,
            MenuItemType::Bpm => 0x09,
            MenuItemType::Rating => 0x0a,
            MenuItemType::Color => 0x0b,
            MenuItemType::Time => 0x0c,
            MenuItemType::Bitrate => 0x0d,
            MenuItemType::Year => 0x0e,
            MenuItemType::Title => 0x0f,
            MenuItemType::SearchResult => 0x10,
            MenuItemType::OriginalArtist => 0x11,
            MenuItemType::Remixer => 0x12,
            MenuItemType::Comment => 0x13,
            MenuItemType::DateAdded => 0x14,
            MenuItemType::Unknown(v) => v,
        }
    }
}

/// Which top-level menu a `RENDER_MENU_REQ` is asking for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MenuTarget {
    Root,
    Playlist,
    History,
    Track,
    Artist,
    Album,
    Genre,
    Label,
    Key,
    Bpm,
    Rating,
    Color,
    Time,
    Bitrate,
    Year,
    Folder,
    Search,
    MoreSearchResults,
    Unknown(u8),
}

impl MenuTarget {
    pub fn from_u8(value: u8) -> Self {
        match value {
            0x01 => MenuTarget::Root,
            0x02 => MenuTarget::Playlist,
            0x03 => MenuTarget::History,
            0x04 => MenuTarget::Track,
            0x05 => MenuTarget::Artist,
            0x06 => MenuTarget::Album,
            0x07 => MenuTarget::Genre,
            0x08 => MenuTarget::Label,
            0x09 => MenuTarget::Key,
            0x0a => MenuTarget::Bpm,
            0x0b => MenuTarget::Rating,
            0x0c => MenuTarget::Color,
            0x0d => MenuTarget::Time,
            0x0e => MenuTarget::Bitrate,
            0x0f => MenuTarget::Year,
            0x10 => MenuTarget::Folder,
            0x11 => MenuTarget::Search,
            0x12 => MenuTarget::MoreSearchResults,
            other => MenuTarget::Unknown(other),
        }
    }

    pub fn to_u8(self) -> u8 {
        match self {
            MenuTarget::Root => 0x01,
            MenuTarget::Playlist => 0x02,
            MenuTarget::History => 0x03,
            MenuTarget::Track => 0x04,
            MenuTarget::Artist => 0x05,
            MenuTarget::Album => 0x06,
            MenuTarget::Genre => 0x07,
            MenuTarget::Label => 0x08,
            MenuTarget::Key => 0x09,
            MenuTarget::Bpm => 0x0a,
            MenuTarget::Rating => 0x0b,
            MenuTarget::Color => 0x0c,
            MenuTarget::Time => 0x0d,
            MenuTarget::Bitrate => 0x0e,
            MenuTarget::Year => 0x0f,
            MenuTarget::Folder => 0x10,
            MenuTarget::Search => 0x11,
            MenuTarget::MoreSearchResults => 0x12,
            MenuTarget::Unknown(v) => v,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn menu_item_type_roundtrips() {
        for t in [
            MenuItemType::Folder,
            MenuItemType::Track,
            MenuItemType::SearchResult,
        ] {
            assert_eq!(MenuItemType::from_u8(t.to_u8()), t);
        }
    }

    #[test]
    fn unknown_menu_item_type_is_retained() {
        assert_eq!(MenuItemType::from_u8(0xee).to_u8(), 0xee);
    }

    #[test]
    fn original_artist_and_remixer_are_independent_variants() {
        assert_ne!(MenuItemType::OriginalArtist, MenuItemType::Remixer);
        assert_ne!(MenuItemType::Remixer, MenuItemType::Album);
        assert_eq!(MenuItemType::from_u8(MenuItemType::Remixer.to_u8()), MenuItemType::Remixer);
    }

    #[test]
    fn menu_target_roundtrips() {
        for t in [MenuTarget::Root, MenuTarget::Search, MenuTarget::Folder] {
            assert_eq!(MenuTarget::from_u8(t.to_u8()), t);
        }
    }
}
