use crate::entities::prelude::*;
use sea_orm_migration::prelude::*;
use sea_orm_migration::sea_orm::Schema;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let backend = manager.get_database_backend();
        let schema = Schema::new(backend);

        manager
            .create_table(
                schema
                    .create_table_from_entity(Sessions)
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                schema
                    .create_table_from_entity(MagicLinks)
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                schema
                    .create_table_from_entity(CtfEvents)
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                schema
                    .create_table_from_entity(Challenges)
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                schema
                    .create_table_from_entity(Badges)
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                schema
                    .create_table_from_entity(UserChallenges)
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                schema
                    .create_table_from_entity(UserBadges)
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_sessions_user_id")
                    .table(SessionsIden::Table)
                    .col(SessionsIden::UserId)
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_ctf_events_namespace_type")
                    .table(CtfEventsIden::Table)
                    .col(CtfEventsIden::Namespace)
                    .col(CtfEventsIden::EventType)
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("uq_user_challenges_ns_user_challenge")
                    .table(UserChallengesIden::Table)
                    .col(UserChallengesIden::Namespace)
                    .col(UserChallengesIden::UserId)
                    .col(UserChallengesIden::ChallengeId)
                    .unique()
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("uq_user_badges_ns_user_badge")
                    .table(UserBadgesIden::Table)
                    .col(UserBadgesIden::Namespace)
                    .col(UserBadgesIden::UserId)
                    .col(UserBadgesIden::BadgeId)
                    .unique()
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(UserBadgesIden::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(UserChallengesIden::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(BadgesIden::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(ChallengesIden::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(CtfEventsIden::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(MagicLinksIden::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(SessionsIden::Table).to_owned())
            .await?;

        Ok(())
    }
}

#[derive(DeriveIden)]
enum SessionsIden {
    #[sea_orm(iden = "sessions")]
    Table,
    UserId,
}

#[derive(DeriveIden)]
enum CtfEventsIden {
    #[sea_orm(iden = "ctf_events")]
    Table,
    Namespace,
    EventType,
}

#[derive(DeriveIden)]
enum UserChallengesIden {
    #[sea_orm(iden = "user_challenges")]
    Table,
    Namespace,
    UserId,
    ChallengeId,
}

#[derive(DeriveIden)]
enum UserBadgesIden {
    #[sea_orm(iden = "user_badges")]
    Table,
    Namespace,
    UserId,
    BadgeId,
}

#[derive(DeriveIden)]
enum MagicLinksIden {
    #[sea_orm(iden = "magic_links")]
    Table,
}

#[derive(DeriveIden)]
enum BadgesIden {
    #[sea_orm(iden = "badges")]
    Table,
}

#[derive(DeriveIden)]
enum ChallengesIden {
    #[sea_orm(iden = "challenges")]
    Table,
}
