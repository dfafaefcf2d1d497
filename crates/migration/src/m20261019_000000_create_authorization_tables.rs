//! Creates the authorization server schema.
//!
//! - oauth2_client: Registered clients
//! - oauth2_user: Resource owners
//! - oauth2_authorization_request: In-flight authorize requests, keyed by (client_id, state)
//! - oauth2_authorization: Hashed single-use authorization codes
//! - oauth2_refresh_token: Issued refresh tokens and their families
//! - audit_event: Authorization audit trail

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // 1. Clients
        manager
            .create_table(
                Table::create()
                    .table(OAuth2Client::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(OAuth2Client::Id)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(OAuth2Client::Name).string().not_null())
                    .col(
                        ColumnDef::new(OAuth2Client::ClientType)
                            .string()
                            .not_null()
                            .default("public"),
                    )
                    .col(ColumnDef::new(OAuth2Client::SecretHash).string().null())
                    .col(ColumnDef::new(OAuth2Client::RedirectUris).text().not_null())
                    .col(
                        ColumnDef::new(OAuth2Client::GrantTypes)
                            .text()
                            .not_null()
                            .default("authorization_code refresh_token"),
                    )
                    .col(
                        ColumnDef::new(OAuth2Client::Scopes)
                            .text()
                            .not_null()
                            .default("openid profile email"),
                    )
                    .col(
                        ColumnDef::new(OAuth2Client::Status)
                            .string()
                            .not_null()
                            .default("active"),
                    )
                    .col(
                        ColumnDef::new(OAuth2Client::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(OAuth2Client::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        // 2. Users
        manager
            .create_table(
                Table::create()
                    .table(OAuth2User::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(OAuth2User::Id)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(OAuth2User::Email)
                            .string()
                            .not_null()
                            .unique_key(),
                    )
                    .col(
                        ColumnDef::new(OAuth2User::Username)
                            .string()
                            .not_null()
                            .unique_key(),
                    )
                    .col(
                        ColumnDef::new(OAuth2User::EmailVerified)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(ColumnDef::new(OAuth2User::Name).string().null())
                    .col(ColumnDef::new(OAuth2User::GivenName).string().null())
                    .col(ColumnDef::new(OAuth2User::FamilyName).string().null())
                    .col(ColumnDef::new(OAuth2User::Picture).string().null())
                    .col(ColumnDef::new(OAuth2User::PasswordHash).string().null())
                    .col(
                        ColumnDef::new(OAuth2User::Status)
                            .string()
                            .not_null()
                            .default("active"),
                    )
                    .col(
                        ColumnDef::new(OAuth2User::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(OAuth2User::LastLoginAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .to_owned(),
            )
            .await?;

        // 3. Pending authorization requests
        manager
            .create_table(
                Table::create()
                    .table(OAuth2AuthorizationRequest::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(OAuth2AuthorizationRequest::ClientId)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(OAuth2AuthorizationRequest::State)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(OAuth2AuthorizationRequest::RedirectUri)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(OAuth2AuthorizationRequest::Scope)
                            .text()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(OAuth2AuthorizationRequest::CodeChallenge)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(OAuth2AuthorizationRequest::CodeChallengeMethod)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(OAuth2AuthorizationRequest::UserId)
                            .string()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(OAuth2AuthorizationRequest::Status)
                            .string()
                            .not_null()
                            .default("pending"),
                    )
                    .col(
                        ColumnDef::new(OAuth2AuthorizationRequest::ExpiresAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(OAuth2AuthorizationRequest::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .primary_key(
                        Index::create()
                            .col(OAuth2AuthorizationRequest::ClientId)
                            .col(OAuth2AuthorizationRequest::State),
                    )
                    .to_owned(),
            )
            .await?;

        // 4. Authorization codes (hashed, single-use)
        manager
            .create_table(
                Table::create()
                    .table(OAuth2Authorization::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(OAuth2Authorization::CodeHash)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(OAuth2Authorization::ClientId)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(OAuth2Authorization::UserId)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(OAuth2Authorization::RedirectUri)
                            .string()
                            .not_null(),
                    )
                    .col(ColumnDef::new(OAuth2Authorization::Scope).text().not_null())
                    .col(
                        ColumnDef::new(OAuth2Authorization::CodeChallenge)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(OAuth2Authorization::CodeChallengeMethod)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(OAuth2Authorization::ExpiresAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(OAuth2Authorization::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(OAuth2Authorization::ConsumedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(OAuth2Authorization::TokenFamily)
                            .string()
                            .null(),
                    )
                    .to_owned(),
            )
            .await?;

        // 5. Refresh tokens
        manager
            .create_table(
                Table::create()
                    .table(OAuth2RefreshToken::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(OAuth2RefreshToken::Jti)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(OAuth2RefreshToken::FamilyId)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(OAuth2RefreshToken::ClientId)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(OAuth2RefreshToken::UserId)
                            .string()
                            .not_null(),
                    )
                    .col(ColumnDef::new(OAuth2RefreshToken::Scope).text().not_null())
                    .col(
                        ColumnDef::new(OAuth2RefreshToken::ExpiresAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(OAuth2RefreshToken::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(OAuth2RefreshToken::ConsumedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(OAuth2RefreshToken::RevokedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .to_owned(),
            )
            .await?;

        // 6. Audit trail
        manager
            .create_table(
                Table::create()
                    .table(AuditEvent::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(AuditEvent::Id)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(AuditEvent::OccurredAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(ColumnDef::new(AuditEvent::Actor).string().not_null())
                    .col(ColumnDef::new(AuditEvent::Action).string().not_null())
                    .col(ColumnDef::new(AuditEvent::Resource).string().null())
                    .col(ColumnDef::new(AuditEvent::Outcome).string().not_null())
                    .col(ColumnDef::new(AuditEvent::Metadata).text().null())
                    .to_owned(),
            )
            .await?;

        // Indexes for housekeeping and family revocation
        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_oauth2_authorization_request_expires_at")
                    .table(OAuth2AuthorizationRequest::Table)
                    .col(OAuth2AuthorizationRequest::ExpiresAt)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_oauth2_authorization_expires_at")
                    .table(OAuth2Authorization::Table)
                    .col(OAuth2Authorization::ExpiresAt)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_oauth2_refresh_token_family_id")
                    .table(OAuth2RefreshToken::Table)
                    .col(OAuth2RefreshToken::FamilyId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_oauth2_refresh_token_expires_at")
                    .table(OAuth2RefreshToken::Table)
                    .col(OAuth2RefreshToken::ExpiresAt)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_audit_event_occurred_at")
                    .table(AuditEvent::Table)
                    .col(AuditEvent::OccurredAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // Drop indexes first
        for name in [
            "idx_audit_event_occurred_at",
            "idx_oauth2_refresh_token_expires_at",
            "idx_oauth2_refresh_token_family_id",
            "idx_oauth2_authorization_expires_at",
            "idx_oauth2_authorization_request_expires_at",
        ] {
            manager
                .drop_index(Index::drop().if_exists().name(name).to_owned())
                .await?;
        }

        manager
            .drop_table(Table::drop().table(AuditEvent::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(OAuth2RefreshToken::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(OAuth2Authorization::Table).to_owned())
            .await?;
        manager
            .drop_table(
                Table::drop()
                    .table(OAuth2AuthorizationRequest::Table)
                    .to_owned(),
            )
            .await?;
        manager
            .drop_table(Table::drop().table(OAuth2User::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(OAuth2Client::Table).to_owned())
            .await?;

        Ok(())
    }
}

#[derive(DeriveIden)]
enum OAuth2Client {
    #[sea_orm(iden = "oauth2_client")]
    Table,
    Id,
    Name,
    ClientType,
    SecretHash,
    RedirectUris,
    GrantTypes,
    Scopes,
    Status,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum OAuth2User {
    #[sea_orm(iden = "oauth2_user")]
    Table,
    Id,
    Email,
    Username,
    EmailVerified,
    Name,
    GivenName,
    FamilyName,
    Picture,
    PasswordHash,
    Status,
    CreatedAt,
    LastLoginAt,
}

#[derive(DeriveIden)]
enum OAuth2AuthorizationRequest {
    #[sea_orm(iden = "oauth2_authorization_request")]
    Table,
    ClientId,
    State,
    RedirectUri,
    Scope,
    CodeChallenge,
    CodeChallengeMethod,
    UserId,
    Status,
    ExpiresAt,
    CreatedAt,
}

#[derive(DeriveIden)]
enum OAuth2Authorization {
    #[sea_orm(iden = "oauth2_authorization")]
    Table,
    CodeHash,
    ClientId,
    UserId,
    RedirectUri,
    Scope,
    CodeChallenge,
    CodeChallengeMethod,
    ExpiresAt,
    CreatedAt,
    ConsumedAt,
    TokenFamily,
}

#[derive(DeriveIden)]
enum OAuth2RefreshToken {
    #[sea_orm(iden = "oauth2_refresh_token")]
    Table,
    Jti,
    FamilyId,
    ClientId,
    UserId,
    Scope,
    ExpiresAt,
    CreatedAt,
    ConsumedAt,
    RevokedAt,
}

#[derive(DeriveIden)]
enum AuditEvent {
    Table,
    Id,
    OccurredAt,
    Actor,
    Action,
    Resource,
    Outcome,
    Metadata,
}
