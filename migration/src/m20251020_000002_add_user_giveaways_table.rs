use sea_orm_migration::prelude::*;

use crate::m20251020_000001_create_users_table::Users;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // Ordered giveaway participation list, one row per push
        manager
            .create_table(
                Table::create()
                    .table(UserGiveaways::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(UserGiveaways::UserAddress)
                            .string_len(128)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(UserGiveaways::Position)
                            .integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(UserGiveaways::GiveawayId)
                            .string_len(24)
                            .not_null(),
                    )
                    .primary_key(
                        Index::create()
                            .col(UserGiveaways::UserAddress)
                            .col(UserGiveaways::Position),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_user_giveaways_user")
                            .from(UserGiveaways::Table, UserGiveaways::UserAddress)
                            .to(Users::Table, Users::Address)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_user_giveaways_giveaway")
                    .table(UserGiveaways::Table)
                    .col(UserGiveaways::GiveawayId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(UserGiveaways::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum UserGiveaways {
    Table,
    UserAddress,
    Position,
    GiveawayId,
}
