//! Input validation limits for catalog records

/// Maximum length for entity names (256 chars)
pub const MAX_ENTITY_NAME_LEN: usize = 256;

/// Maximum length for a fully qualified name (3072 chars)
pub const MAX_FQN_LEN: usize = 3072;

/// Maximum length for a description (64KB)
pub const MAX_DESCRIPTION_LEN: usize = 64 * 1024;

/// Maximum tags per entity (100)
pub const MAX_TAGS_PER_ENTITY: usize = 100;

/// Default number of entities per listing page
pub const DEFAULT_PAGE_SIZE: usize = 10;

/// Maximum number of entities per listing page
pub const MAX_PAGE_SIZE: usize = 1000;

/// Validation error type
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    EmptyEntityName,
    EntityNameTooLong { len: usize, max: usize },
    FqnTooLong { len: usize, max: usize },
    DescriptionTooLong { len: usize, max: usize },
    TooManyTags { count: usize, max: usize },
    PageSizeOutOfRange { size: usize, max: usize },
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyEntityName => write!(f, "Entity name cannot be empty"),
            Self::EntityNameTooLong { len, max } => {
                write!(f, "Entity name too long: {} chars (max {})", len, max)
            }
            Self::FqnTooLong { len, max } => {
                write!(f, "Fully qualified name too long: {} chars (max {})", len, max)
            }
            Self::DescriptionTooLong { len, max } => {
                write!(f, "Description too long: {} chars (max {})", len, max)
            }
            Self::TooManyTags { count, max } => {
                write!(f, "Too many tags: {} (max {})", count, max)
            }
            Self::PageSizeOutOfRange { size, max } => {
                write!(f, "Page size must be between 1 and {}, got {}", max, size)
            }
        }
    }
}

impl std::error::Error for ValidationError {}

impl From<ValidationError> for crate::Error {
    fn from(e: ValidationError) -> Self {
        crate::Error::InvalidArgument(e.to_string())
    }
}

/// Validate entity name
pub fn validate_entity_name(name: &str) -> Result<(), ValidationError> {
    if name.trim().is_empty() {
        return Err(ValidationError::EmptyEntityName);
    }
    if name.len() > MAX_ENTITY_NAME_LEN {
        return Err(ValidationError::EntityNameTooLong {
            len: name.len(),
            max: MAX_ENTITY_NAME_LEN,
        });
    }
    Ok(())
}

/// Validate fully qualified name
pub fn validate_fqn(fqn: &str) -> Result<(), ValidationError> {
    if fqn.len() > MAX_FQN_LEN {
        return Err(ValidationError::FqnTooLong {
            len: fqn.len(),
            max: MAX_FQN_LEN,
        });
    }
    Ok(())
}

/// Validate description
pub fn validate_description(description: &str) -> Result<(), ValidationError> {
    if description.len() > MAX_DESCRIPTION_LEN {
        return Err(ValidationError::DescriptionTooLong {
            len: description.len(),
            max: MAX_DESCRIPTION_LEN,
        });
    }
    Ok(())
}

/// Validate tag count
pub fn validate_tag_count(count: usize) -> Result<(), ValidationError> {
    if count > MAX_TAGS_PER_ENTITY {
        return Err(ValidationError::TooManyTags {
            count,
            max: MAX_TAGS_PER_ENTITY,
        });
    }
    Ok(())
}

/// Validate listing page size
pub fn validate_page_size(size: usize) -> Result<(), ValidationError> {
    if size == 0 || size > MAX_PAGE_SIZE {
        return Err(ValidationError::PageSizeOutOfRange {
            size,
            max: MAX_PAGE_SIZE,
        });
    }
    Ok(())
}

/// Validate the stored fields of an entity
pub fn validate_entity(entity: &crate::Entity) -> Result<(), ValidationError> {
    validate_entity_name(&entity.name)?;
    validate_fqn(&entity.fully_qualified_name)?;
    if let Some(description) = &entity.description {
        validate_description(description)?;
    }
    validate_tag_count(entity.tags.len())
}
